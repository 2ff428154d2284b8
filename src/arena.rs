//! User memory: one growable arena backing the dictionary and all data
//! allocations.
//!
//! Addresses handed out to Forth code are byte offsets into this buffer, not
//! host pointers, so growing the arena can reallocate the backing storage
//! without invalidating a single link, execution token or user pointer.
//! Offset 0 is reserved; a zero cell therefore reads as a null link, which
//! terminates the dictionary chain.
//!
//! `here` is the allocation pointer. It only moves forward except on an
//! explicit `dealloc` (negative ALLOT), and `shrink` refuses to move the
//! capacity boundary at or below it.

use tracing::{debug, warn};

use crate::cell::{align_addr, is_aligned, Cell, CELL};
use crate::exception::Exception;

/// Initial arena size, in cells.
pub const INIT_USIZE: usize = 4096;
/// Default growth increment, in cells (the UINCR variable's initial value).
pub const INIT_UINCR: usize = 1024;
/// Default low-water threshold, in cells (the UTHRES variable's initial value).
pub const INIT_UTHRES: usize = 1024;

#[derive(Debug)]
pub struct Arena {
    bytes: Vec<u8>,
    here: usize,
}

impl Arena {
    /// Allocate a fresh arena of at least `ncells` cells; zero falls back to
    /// the default size.
    pub fn new(ncells: usize) -> Arena {
        let ncells = if ncells == 0 { INIT_USIZE } else { ncells };
        Arena {
            bytes: vec![0; ncells * CELL],
            // Reserve offset 0 so no entry or allocation lives there.
            here: CELL,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn size_cells(&self) -> usize {
        self.bytes.len() / CELL
    }

    pub fn here(&self) -> usize {
        self.here
    }

    pub fn unused(&self) -> usize {
        self.bytes.len() - self.here
    }

    /// True when free space has dropped under `threshold_cells`, i.e. the
    /// run loop should grow the arena before the dictionary fills up.
    pub fn should_grow(&self, threshold_cells: usize) -> bool {
        self.unused() / CELL < threshold_cells
    }

    /// Extend capacity by `ncells`. Existing offsets stay valid. Returns
    /// false (arena untouched) if the host allocation fails.
    pub fn grow(&mut self, ncells: usize) -> bool {
        let add = ncells * CELL;
        if self.bytes.try_reserve_exact(add).is_err() {
            warn!(ncells, "user memory grow failed; arena unchanged");
            return false;
        }
        let new_len = self.bytes.len() + add;
        self.bytes.resize(new_len, 0);
        debug!(ncells, total_cells = self.size_cells(), "grew user memory");
        true
    }

    /// Release `ncells` from the end. Refused when the new boundary would
    /// fall at or below `here`.
    pub fn shrink(&mut self, ncells: usize) -> bool {
        let sub = ncells * CELL;
        if sub > self.bytes.len() || self.bytes.len() - sub <= self.here {
            warn!(ncells, "rejected shrink of user memory still in use");
            return false;
        }
        let new_len = self.bytes.len() - sub;
        self.bytes.truncate(new_len);
        self.bytes.shrink_to_fit();
        debug!(ncells, total_cells = self.size_cells(), "shrank user memory");
        true
    }

    /// Advance `here` to the next cell boundary.
    #[must_use]
    pub fn align(&mut self) -> bool {
        let aligned = align_addr(self.here);
        if aligned > self.bytes.len() {
            return false;
        }
        self.here = aligned;
        true
    }

    /// Take `bytes` from the free region, returning the offset of the
    /// allocation. Unlike the source design this is bounds-checked: an
    /// oversized request throws instead of running off the end.
    pub fn alloc(&mut self, bytes: usize) -> Result<usize, Exception> {
        if bytes > self.unused() {
            return Err(Exception::DictionaryOverflow);
        }
        let addr = self.here;
        self.here += bytes;
        Ok(addr)
    }

    /// Give back `bytes` from the end of the allocated region.
    #[must_use]
    pub fn dealloc(&mut self, bytes: usize) -> bool {
        if bytes > self.here - CELL {
            return false;
        }
        self.here -= bytes;
        true
    }

    fn check_range(&self, addr: usize, len: usize) -> Result<(), Exception> {
        // Valid data lives in [CELL, here): offset 0 is the reserved null
        // cell and anything past `here` has never been allocated.
        if addr < CELL || addr.checked_add(len).map_or(true, |end| end > self.here) {
            return Err(Exception::InvalidAddress);
        }
        Ok(())
    }

    pub fn is_valid_cell_addr(&self, addr: usize) -> bool {
        is_aligned(addr) && self.check_range(addr, CELL).is_ok()
    }

    pub fn fetch_cell(&self, addr: usize) -> Result<Cell, Exception> {
        if !is_aligned(addr) {
            return Err(Exception::InvalidAddress);
        }
        self.check_range(addr, CELL)?;
        let mut buf = [0u8; CELL];
        buf.copy_from_slice(&self.bytes[addr..addr + CELL]);
        Ok(Cell::from_ne_bytes(buf))
    }

    pub fn store_cell(&mut self, addr: usize, val: Cell) -> Result<(), Exception> {
        if !is_aligned(addr) {
            return Err(Exception::InvalidAddress);
        }
        self.check_range(addr, CELL)?;
        self.bytes[addr..addr + CELL].copy_from_slice(&val.to_ne_bytes());
        Ok(())
    }

    pub fn fetch_u8(&self, addr: usize) -> Result<u8, Exception> {
        self.check_range(addr, 1)?;
        Ok(self.bytes[addr])
    }

    pub fn store_u8(&mut self, addr: usize, val: u8) -> Result<(), Exception> {
        self.check_range(addr, 1)?;
        self.bytes[addr] = val;
        Ok(())
    }

    pub fn slice(&self, addr: usize, len: usize) -> Result<&[u8], Exception> {
        self.check_range(addr, len)?;
        Ok(&self.bytes[addr..addr + len])
    }

    pub fn slice_mut(&mut self, addr: usize, len: usize) -> Result<&mut [u8], Exception> {
        self.check_range(addr, len)?;
        Ok(&mut self.bytes[addr..addr + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_align() {
        let mut arena = Arena::new(128);
        let free = arena.unused();
        assert!(arena.align());
        assert_eq!(arena.unused(), free);
        arena.alloc(1).unwrap();
        assert_eq!(arena.unused(), free - 1);
        assert!(arena.align());
        assert_eq!(arena.unused(), free - CELL);
        arena.alloc(CELL - 1).unwrap();
        assert!(arena.align());
        assert_eq!(arena.unused(), free - 2 * CELL);
    }

    #[test]
    fn test_alloc_is_bounds_checked() {
        let mut arena = Arena::new(4);
        assert_eq!(
            arena.alloc(arena.unused() + 1),
            Err(Exception::DictionaryOverflow)
        );
        // A fitting allocation still succeeds afterwards.
        arena.alloc(arena.unused()).unwrap();
        assert_eq!(arena.unused(), 0);
    }

    #[test]
    fn test_cell_store_fetch() {
        let mut arena = Arena::new(16);
        let addr = arena.alloc(CELL).unwrap();
        arena.store_cell(addr, Cell::from_int(-42)).unwrap();
        assert_eq!(arena.fetch_cell(addr).unwrap(), Cell::from_int(-42));
        // Unaligned and unallocated addresses are rejected.
        assert_eq!(arena.fetch_cell(addr + 1), Err(Exception::InvalidAddress));
        assert_eq!(
            arena.fetch_cell(arena.here()),
            Err(Exception::InvalidAddress)
        );
        assert_eq!(arena.fetch_cell(0), Err(Exception::InvalidAddress));
    }

    #[test]
    fn test_byte_store_fetch() {
        let mut arena = Arena::new(16);
        let addr = arena.alloc(4).unwrap();
        arena.store_u8(addr + 3, 0xAB).unwrap();
        assert_eq!(arena.fetch_u8(addr + 3).unwrap(), 0xAB);
        assert_eq!(arena.store_u8(arena.here(), 0), Err(Exception::InvalidAddress));
    }

    #[test]
    fn test_grow_keeps_offsets() {
        let mut arena = Arena::new(8);
        let addr = arena.alloc(CELL).unwrap();
        arena.store_cell(addr, Cell::from_int(7)).unwrap();
        assert!(arena.grow(8));
        assert_eq!(arena.size_cells(), 16);
        assert_eq!(arena.fetch_cell(addr).unwrap(), Cell::from_int(7));
    }

    #[test]
    fn test_shrink_refused_below_here() {
        let mut arena = Arena::new(8);
        arena.alloc(4 * CELL).unwrap();
        let cells = arena.size_cells();
        let here = arena.here();
        // Releasing more than the free tail must be refused with no change.
        assert!(!arena.shrink(5));
        assert_eq!(arena.size_cells(), cells);
        assert_eq!(arena.here(), here);
        assert!(arena.shrink(2));
        assert_eq!(arena.size_cells(), cells - 2);
    }

    #[test]
    fn test_dealloc() {
        let mut arena = Arena::new(8);
        arena.alloc(2 * CELL).unwrap();
        let here = arena.here();
        assert!(arena.dealloc(CELL));
        assert_eq!(arena.here(), here - CELL);
        // Cannot dealloc past the reserved null cell.
        assert!(!arena.dealloc(10 * CELL));
    }
}
