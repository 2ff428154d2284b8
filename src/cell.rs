//! The machine word underlying everything the VM stores.
//!
//! A `Cell` is a pointer-width value that is read, depending on context, as a
//! signed integer, an unsigned integer or an arena address. There is no
//! runtime tag; the reinterpretation is explicit at every call site, which
//! mirrors how the dictionary stores behavior tags and body addresses as
//! plain cell values.

/// Size of one cell in bytes.
pub const CELL: usize = std::mem::size_of::<isize>();

/// Forth truth values: all bits set for true, zero for false.
pub const FORTH_TRUE: isize = -1;
pub const FORTH_FALSE: isize = 0;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct Cell(isize);

impl Cell {
    pub const ZERO: Cell = Cell(0);

    pub fn from_int(v: isize) -> Cell {
        Cell(v)
    }

    pub fn from_uint(v: usize) -> Cell {
        Cell(v as isize)
    }

    /// Store an arena byte offset as a cell.
    pub fn from_addr(addr: usize) -> Cell {
        Cell(addr as isize)
    }

    pub fn from_bool(v: bool) -> Cell {
        Cell(if v { FORTH_TRUE } else { FORTH_FALSE })
    }

    pub fn to_int(self) -> isize {
        self.0
    }

    pub fn to_uint(self) -> usize {
        self.0 as usize
    }

    /// Read the cell back as an arena byte offset.
    pub fn to_addr(self) -> usize {
        self.0 as usize
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn to_ne_bytes(self) -> [u8; CELL] {
        self.0.to_ne_bytes()
    }

    pub fn from_ne_bytes(bytes: [u8; CELL]) -> Cell {
        Cell(isize::from_ne_bytes(bytes))
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn is_aligned(addr: usize) -> bool {
    addr % CELL == 0
}

/// Round `addr` up to the next cell boundary.
pub fn align_addr(addr: usize) -> usize {
    let aligned = (addr + (CELL - 1)) & !(CELL - 1);
    debug_assert!(is_aligned(aligned));
    debug_assert!(aligned >= addr);
    aligned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_addr() {
        assert_eq!(align_addr(0), 0);
        assert_eq!(align_addr(1), CELL);
        assert_eq!(align_addr(CELL - 1), CELL);
        assert_eq!(align_addr(CELL), CELL);
        assert_eq!(align_addr(CELL + 1), 2 * CELL);
    }

    #[test]
    fn test_cell_reinterpretation() {
        let c = Cell::from_int(-1);
        assert_eq!(c.to_uint(), usize::MAX);
        let addr = Cell::from_addr(0x40);
        assert_eq!(addr.to_addr(), 0x40);
        assert_eq!(addr.to_int(), 0x40);
        assert_eq!(Cell::from_ne_bytes(c.to_ne_bytes()), c);
    }

    #[test]
    fn test_cell_bool() {
        assert_eq!(Cell::from_bool(true).to_int(), FORTH_TRUE);
        assert_eq!(Cell::from_bool(false).to_int(), FORTH_FALSE);
    }
}
