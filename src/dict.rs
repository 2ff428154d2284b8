//! The dictionary: named word entries threaded through the arena.
//!
//! Memory layout of an entry, all offsets in bytes from the entry start:
//!
//! | link: cell | flags|len: byte | name: 31 bytes | sentinel: cell | code: cell | param... |
//!
//! The link is the arena offset of the previous entry; zero terminates the
//! chain at the ROOT sentinel entry, which owns no name and is never found.
//! The flags byte packs IMMEDIATE, COMPILE-ONLY and HIDDEN bits with a 5-bit
//! name length, and sits immediately before the name bytes so the pair reads
//! as a counted string (`DE>NAME C@ F_LENMASK AND` is the name length). The
//! guard cell before the code field lets the execution engine reject tokens
//! that do not point at a real code field.
//! The code cell holds a behavior tag (see [`CodeField`]), and the execution
//! token of a word is the address of its code cell.

use crate::arena::Arena;
use crate::cell::{Cell, CELL};
use crate::exception::Exception;

pub const MAX_WORD_LEN: usize = 31;

/// Guard value stored immediately before every code field.
pub const SENTINEL: usize = 0xCAFE_BABE;

pub const F_IMMED: u8 = 0x80;
pub const F_COMPONLY: u8 = 0x40;
pub const F_HIDDEN: u8 = 0x20;
pub const F_LENMASK: u8 = 0x1F;

const LINK_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = CELL;
const NAME_OFFSET: usize = FLAGS_OFFSET + 1;
// Flags byte plus name region span 32 bytes, keeping the sentinel aligned.
const SENTINEL_OFFSET: usize = NAME_OFFSET + MAX_WORD_LEN;
const CODE_OFFSET: usize = SENTINEL_OFFSET + CELL;
const PARAM_OFFSET: usize = CODE_OFFSET + CELL;
/// Fixed header size, up to and including the code field.
pub const HEADER_BYTES: usize = PARAM_OFFSET;

/// Offset arithmetic between an entry and its code/parameter fields. These
/// must stay consistent with the header layout above.
pub fn entry_to_cfa(entry: usize) -> usize {
    entry + CODE_OFFSET
}

pub fn entry_to_pfa(entry: usize) -> usize {
    entry + PARAM_OFFSET
}

/// Address of an entry's counted name string: the flags|len byte followed
/// by the name bytes.
pub fn entry_to_name(entry: usize) -> usize {
    entry + FLAGS_OFFSET
}

pub fn cfa_to_entry(cfa: usize) -> usize {
    cfa.wrapping_sub(CODE_OFFSET)
}

pub fn cfa_to_pfa(cfa: usize) -> usize {
    cfa + CELL
}

pub fn pfa_to_entry(pfa: usize) -> usize {
    pfa.wrapping_sub(PARAM_OFFSET)
}

pub fn pfa_to_cfa(pfa: usize) -> usize {
    pfa.wrapping_sub(CELL)
}

/// The behavior stored in a code field: which interpreter routine runs when
/// the word executes. Encoded as a plain cell so Forth code can read and
/// patch code fields (`:` overwrites a CREATEd word's tag with the colon
/// runner via the DOCOL constant).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CodeField {
    Colon,
    Constant,
    Variable,
    Value,
    Primitive(usize),
}

pub const CODE_DOCOL: isize = 1;
pub const CODE_DOCON: isize = 2;
pub const CODE_DOVAR: isize = 3;
pub const CODE_DOVAL: isize = 4;
const CODE_PRIM_BASE: isize = 0x100;

impl CodeField {
    pub fn encode(self) -> Cell {
        Cell::from_int(match self {
            CodeField::Colon => CODE_DOCOL,
            CodeField::Constant => CODE_DOCON,
            CodeField::Variable => CODE_DOVAR,
            CodeField::Value => CODE_DOVAL,
            CodeField::Primitive(ix) => CODE_PRIM_BASE + ix as isize,
        })
    }

    /// Decode a code cell; `prim_count` bounds the primitive table.
    pub fn decode(cell: Cell, prim_count: usize) -> Option<CodeField> {
        match cell.to_int() {
            CODE_DOCOL => Some(CodeField::Colon),
            CODE_DOCON => Some(CodeField::Constant),
            CODE_DOVAR => Some(CodeField::Variable),
            CODE_DOVAL => Some(CodeField::Value),
            v if v >= CODE_PRIM_BASE && ((v - CODE_PRIM_BASE) as usize) < prim_count => {
                Some(CodeField::Primitive((v - CODE_PRIM_BASE) as usize))
            }
            _ => None,
        }
    }
}

/// The arena plus the dictionary threaded through it.
#[derive(Debug)]
pub struct DataSpace {
    arena: Arena,
    /// Entry address of the most recent definition (the LATEST word).
    latest: usize,
}

impl DataSpace {
    pub fn new(ncells: usize) -> DataSpace {
        let mut space = DataSpace {
            arena: Arena::new(ncells),
            latest: 0,
        };
        // The ROOT sentinel: zero link, zero-length name, zero guard so it
        // can never be executed. It exists purely to terminate the chain.
        let root = space
            .arena
            .alloc(HEADER_BYTES)
            .expect("arena too small for the ROOT entry");
        space.latest = root;
        space
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub fn here(&self) -> usize {
        self.arena.here()
    }

    pub fn latest(&self) -> usize {
        self.latest
    }

    /// Allocate a new dictionary entry. The name must be 1..=31 bytes; the
    /// header is cell-aligned and `here` ends up at the parameter field.
    pub fn create(&mut self, name: &[u8], flags: u8, code: CodeField) -> Result<usize, Exception> {
        assert_eq!(flags & F_LENMASK, 0);
        if name.is_empty() {
            return Err(Exception::EmptyName);
        }
        if name.len() > MAX_WORD_LEN {
            return Err(Exception::NameTooLong);
        }
        if !self.arena.align() {
            return Err(Exception::DictionaryOverflow);
        }
        let entry = self.arena.alloc(HEADER_BYTES)?;
        let link = self.latest;
        self.arena.store_cell(entry + LINK_OFFSET, Cell::from_addr(link))?;
        let packed = flags | name.len() as u8;
        self.arena.store_u8(entry + FLAGS_OFFSET, packed)?;
        let name_buf = self.arena.slice_mut(entry + NAME_OFFSET, MAX_WORD_LEN)?;
        name_buf.fill(0);
        name_buf[..name.len()].copy_from_slice(name);
        self.arena
            .store_cell(entry + SENTINEL_OFFSET, Cell::from_uint(SENTINEL))?;
        self.arena.store_cell(entry + CODE_OFFSET, code.encode())?;
        self.latest = entry;
        Ok(entry)
    }

    /// Overwrite an entry's behavior tag (used by `:` to patch a CREATEd
    /// word into a colon definition).
    pub fn set_code(&mut self, entry: usize, code: Cell) -> Result<(), Exception> {
        self.check_entry(entry)?;
        self.arena.store_cell(entry + CODE_OFFSET, code)
    }

    pub fn code(&self, entry: usize) -> Result<Cell, Exception> {
        self.arena.fetch_cell(entry + CODE_OFFSET)
    }

    pub fn link(&self, entry: usize) -> Result<usize, Exception> {
        Ok(self.arena.fetch_cell(entry + LINK_OFFSET)?.to_addr())
    }

    pub fn flags(&self, entry: usize) -> Result<u8, Exception> {
        self.arena.fetch_u8(entry + FLAGS_OFFSET)
    }

    pub fn name_len(&self, entry: usize) -> Result<usize, Exception> {
        Ok((self.flags(entry)? & F_LENMASK) as usize)
    }

    pub fn name(&self, entry: usize) -> Result<&[u8], Exception> {
        let len = self.name_len(entry)?;
        self.arena.slice(entry + NAME_OFFSET, len)
    }

    /// The name rendered for diagnostics; dictionary names are raw bytes.
    pub fn name_lossy(&self, entry: usize) -> String {
        self.name(entry)
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_default()
    }

    pub fn is_immediate(&self, entry: usize) -> Result<bool, Exception> {
        Ok(self.flags(entry)? & F_IMMED != 0)
    }

    pub fn is_comp_only(&self, entry: usize) -> Result<bool, Exception> {
        Ok(self.flags(entry)? & F_COMPONLY != 0)
    }

    pub fn is_hidden(&self, entry: usize) -> Result<bool, Exception> {
        Ok(self.flags(entry)? & F_HIDDEN != 0)
    }

    /// XOR one flag bit on an entry (IMMEDIATE, COMPILE-ONLY, HIDDEN).
    pub fn toggle_flag(&mut self, entry: usize, flag: u8) -> Result<(), Exception> {
        assert_eq!(flag & F_LENMASK, 0);
        self.check_entry(entry)?;
        let flags = self.flags(entry)?;
        self.arena.store_u8(entry + FLAGS_OFFSET, flags ^ flag)
    }

    /// Validate that `entry` really is a dictionary entry by checking its
    /// guard cell. The ROOT entry carries a zero guard and so fails too.
    pub fn check_entry(&self, entry: usize) -> Result<(), Exception> {
        let guard = self.arena.fetch_cell(entry + SENTINEL_OFFSET)?;
        if guard.to_uint() != SENTINEL {
            return Err(Exception::InvalidAddress);
        }
        Ok(())
    }

    /// Newest-first lookup. The packed comparison folds the HIDDEN bit into
    /// the length byte, so hidden entries never match any 1..=31 byte name.
    pub fn find(&self, name: &[u8]) -> Result<Option<usize>, Exception> {
        let mut addr = self.latest;
        while addr != 0 {
            let flags = self.flags(addr)?;
            if (flags & (F_HIDDEN | F_LENMASK)) as usize == name.len()
                && self.arena.slice(addr + NAME_OFFSET, name.len())? == name
            {
                return Ok(Some(addr));
            }
            addr = self.link(addr)?;
        }
        Ok(None)
    }

    /// Release bytes from the top of the arena, unlinking any dictionary
    /// entries whose headers no longer fit below the new `here`.
    pub fn dealloc(&mut self, bytes: usize) -> bool {
        let Some(new_here) = self.here().checked_sub(bytes) else {
            return false;
        };
        let mut new_head = 0;
        let mut addr = self.latest;
        while addr != 0 {
            if addr + HEADER_BYTES <= new_here {
                new_head = addr;
                break;
            }
            match self.link(addr) {
                Ok(prev) => addr = prev,
                Err(_) => return false,
            }
        }
        if self.arena.dealloc(bytes) {
            self.latest = new_head;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_find() {
        let mut space = DataSpace::new(256);
        assert_eq!(space.find(b"DUP").unwrap(), None);
        let dup = space.create(b"DUP", 0, CodeField::Variable).unwrap();
        assert_eq!(space.find(b"DUP").unwrap(), Some(dup));
        assert_eq!(space.name(dup).unwrap(), b"DUP");
        assert_eq!(space.latest(), dup);

        let swap = space.create(b"SWAP", 0, CodeField::Variable).unwrap();
        assert_eq!(space.find(b"DUP").unwrap(), Some(dup));
        assert_eq!(space.find(b"SWAP").unwrap(), Some(swap));
        assert_eq!(space.link(swap).unwrap(), dup);
    }

    #[test]
    fn test_name_reads_as_counted_string() {
        let mut space = DataSpace::new(256);
        let entry = space.create(b"DUP", F_IMMED, CodeField::Variable).unwrap();
        let caddr = entry_to_name(entry);
        // The byte at the name address packs flags and length; the name
        // bytes follow directly.
        let packed = space.arena().fetch_u8(caddr).unwrap();
        assert_eq!(packed & F_LENMASK, 3);
        assert_ne!(packed & F_IMMED, 0);
        assert_eq!(space.arena().slice(caddr + 1, 3).unwrap(), b"DUP");
    }

    #[test]
    fn test_redefinition_shadows_but_keeps_old_entry() {
        let mut space = DataSpace::new(256);
        let old = space.create(b"DUP", 0, CodeField::Variable).unwrap();
        let new = space.create(b"DUP", 0, CodeField::Variable).unwrap();
        assert_ne!(old, new);
        assert_eq!(space.find(b"DUP").unwrap(), Some(new));
        // The old entry is still intact and reachable through the chain.
        assert_eq!(space.link(new).unwrap(), old);
        assert_eq!(space.name(old).unwrap(), b"DUP");
    }

    #[test]
    fn test_hidden_entries_are_invisible() {
        let mut space = DataSpace::new(256);
        let entry = space.create(b"SECRET", 0, CodeField::Variable).unwrap();
        space.toggle_flag(entry, F_HIDDEN).unwrap();
        assert_eq!(space.find(b"SECRET").unwrap(), None);
        // The entry itself still exists; unhiding restores lookup.
        assert!(space.is_hidden(entry).unwrap());
        space.toggle_flag(entry, F_HIDDEN).unwrap();
        assert_eq!(space.find(b"SECRET").unwrap(), Some(entry));
    }

    #[test]
    fn test_name_length_limits() {
        let mut space = DataSpace::new(256);
        assert_eq!(
            space.create(b"", 0, CodeField::Variable),
            Err(Exception::EmptyName)
        );
        let long = [b'X'; 32];
        assert_eq!(
            space.create(&long, 0, CodeField::Variable),
            Err(Exception::NameTooLong)
        );
        let just_fits = [b'X'; 31];
        space.create(&just_fits, 0, CodeField::Variable).unwrap();
        assert!(space.find(&just_fits).unwrap().is_some());
    }

    #[test]
    fn test_sentinel_guards_entries() {
        let mut space = DataSpace::new(256);
        let entry = space.create(b"OK", 0, CodeField::Variable).unwrap();
        assert!(space.check_entry(entry).is_ok());
        // The parameter field is not an entry.
        assert!(space.check_entry(entry_to_pfa(entry)).is_err());
    }

    #[test]
    fn test_code_field_roundtrip() {
        for code in [
            CodeField::Colon,
            CodeField::Constant,
            CodeField::Variable,
            CodeField::Value,
            CodeField::Primitive(0),
            CodeField::Primitive(90),
        ] {
            assert_eq!(CodeField::decode(code.encode(), 91), Some(code));
        }
        assert_eq!(CodeField::decode(Cell::from_int(0), 91), None);
        assert_eq!(CodeField::decode(CodeField::Primitive(91).encode(), 91), None);
    }

    #[test]
    fn test_cfa_pfa_translation() {
        let mut space = DataSpace::new(256);
        let entry = space.create(b"W", 0, CodeField::Variable).unwrap();
        let cfa = entry_to_cfa(entry);
        let pfa = entry_to_pfa(entry);
        assert_eq!(cfa_to_entry(cfa), entry);
        assert_eq!(cfa_to_pfa(cfa), pfa);
        assert_eq!(pfa_to_entry(pfa), entry);
        assert_eq!(pfa_to_cfa(pfa), cfa);
        // here sits at the parameter field after create.
        assert_eq!(space.here(), pfa);
    }

    #[test]
    fn test_dealloc_rolls_back_dictionary_head() {
        let mut space = DataSpace::new(256);
        let first = space.create(b"FIRST", 0, CodeField::Variable).unwrap();
        let second = space.create(b"SECOND", 0, CodeField::Variable).unwrap();
        let bytes = space.here() - second;
        assert!(space.dealloc(bytes));
        assert_eq!(space.latest(), first);
        assert_eq!(space.find(b"SECOND").unwrap(), None);
        assert_eq!(space.find(b"FIRST").unwrap(), Some(first));
    }
}
