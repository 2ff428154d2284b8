//! The virtual machine: execution engine, inner and outer interpreters,
//! CATCH/THROW and the top-level run loop.
//!
//! Execution is indirect-threaded. An execution token (XT) is the arena
//! offset of a word's code field; `execute` validates the guard cell sitting
//! right before it, decodes the behavior tag and dispatches with the
//! parameter-field address. Colon bodies are sequences of XTs interspersed
//! with the inline opcodes LIT, BRANCH, 0BRANCH and LITSTRING, whose
//! primitive bodies merely flip the colon-mode register; the actual operand
//! consumption happens in `run_colon`, one level up.

use std::io::{BufRead, ErrorKind, Write};

use tracing::{debug, error, warn};

use crate::arena::{INIT_UINCR, INIT_UTHRES};
use crate::cell::{align_addr, Cell, CELL};
use crate::dict::{
    cfa_to_pfa, entry_to_cfa, CodeField, DataSpace, CODE_DOCOL, CODE_DOCON, CODE_DOVAL,
    CODE_DOVAR, F_COMPONLY, F_HIDDEN, F_IMMED, F_LENMASK, SENTINEL,
};
use crate::exception::{
    Exception, ExceptionFrame, Result, Unwind, EXC_ABORT, EXC_ABORTQ, EXC_QUIT,
    MAX_EXCEPTION_FRAMES,
};
use crate::prims::PRIMITIVES;
use crate::stack::{Stack, StackKind};

/// Longest counted string WORD can produce.
pub const MAX_COUNTED_STRING: usize = 255;
const WORD_BUF_BYTES: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterpState {
    Interpret = 0,
    Compile = 1,
}

/// Mode register of the colon-body runner. Saved and restored around every
/// nested invocation, so a colon definition calling another never shares
/// mode state with its caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColonMode {
    Skip = -1,
    Normal = 0,
    Branch = 1,
    Literal = 2,
    StringLiteral = 3,
}

/// Sizing knobs for a fresh machine. Zero arena/growth values select the
/// defaults.
#[derive(Copy, Clone, Debug)]
pub struct MachineConfig {
    pub data_space_cells: usize,
    pub data_stack_cells: usize,
    pub return_stack_cells: usize,
    pub control_stack_cells: usize,
    /// Initial value of the UINCR variable, in cells.
    pub growth_increment_cells: usize,
    /// Initial value of the UTHRES variable, in cells.
    pub growth_threshold_cells: usize,
}

impl Default for MachineConfig {
    fn default() -> MachineConfig {
        MachineConfig {
            data_space_cells: 0,
            data_stack_cells: 256,
            return_stack_cells: 256,
            control_stack_cells: 256,
            growth_increment_cells: 0,
            growth_threshold_cells: 0,
        }
    }
}

/// Everything a cold start builds from scratch: the dictionary with every
/// primitive registered, the boot variables and the parse buffers. ABORT
/// rebuilds one of these, discarding the old data space entirely.
struct BootImage {
    space: DataSpace,
    base_addr: usize,
    uincr_addr: usize,
    uthres_addr: usize,
    word_bufs: [usize; 2],
    lit_cfa: usize,
}

fn boot(config: &MachineConfig) -> BootImage {
    let mut space = DataSpace::new(config.data_space_cells);

    let uincr = match config.growth_increment_cells {
        0 => INIT_UINCR,
        n => n,
    };
    let uthres = match config.growth_threshold_cells {
        0 => INIT_UTHRES,
        n => n,
    };
    let base_addr = define_variable(&mut space, b"BASE", Cell::ZERO);
    let uincr_addr = define_variable(&mut space, b"UINCR", Cell::from_uint(uincr));
    let uthres_addr = define_variable(&mut space, b"UTHRES", Cell::from_uint(uthres));

    define_constant(&mut space, b"VERSION", Cell::from_int(1));
    define_constant(&mut space, b"DOCOL", Cell::from_int(CODE_DOCOL));
    define_constant(&mut space, b"DOVAR", Cell::from_int(CODE_DOVAR));
    define_constant(&mut space, b"DOCON", Cell::from_int(CODE_DOCON));
    define_constant(&mut space, b"DOVAL", Cell::from_int(CODE_DOVAL));
    define_constant(&mut space, b"EXIT", Cell::ZERO);
    define_constant(&mut space, b"F_IMMED", Cell::from_uint(F_IMMED as usize));
    define_constant(&mut space, b"F_COMPONLY", Cell::from_uint(F_COMPONLY as usize));
    define_constant(&mut space, b"F_HIDDEN", Cell::from_uint(F_HIDDEN as usize));
    define_constant(&mut space, b"F_LENMASK", Cell::from_uint(F_LENMASK as usize));
    define_constant(&mut space, b"S_INTERPRET", Cell::from_int(0));
    define_constant(&mut space, b"S_COMPILE", Cell::from_int(1));
    define_constant(&mut space, b"CELL_MIN", Cell::from_int(isize::MIN));
    define_constant(&mut space, b"CELL_MAX", Cell::from_int(isize::MAX));
    define_constant(&mut space, b"UCELL_MIN", Cell::from_uint(0));
    define_constant(&mut space, b"UCELL_MAX", Cell::from_uint(usize::MAX));

    for (ix, prim) in PRIMITIVES.iter().enumerate() {
        space
            .create(prim.name.as_bytes(), prim.flags, CodeField::Primitive(ix))
            .expect("bootstrap dictionary overflow");
    }

    let word_bufs = [
        space.arena_mut().alloc(WORD_BUF_BYTES).expect("bootstrap"),
        space.arena_mut().alloc(WORD_BUF_BYTES).expect("bootstrap"),
    ];
    assert!(space.arena_mut().align());

    let lit_entry = space
        .find(b"LIT")
        .expect("bootstrap dictionary is readable")
        .expect("LIT is a registered primitive");

    BootImage {
        space,
        base_addr,
        uincr_addr,
        uthres_addr,
        word_bufs,
        lit_cfa: entry_to_cfa(lit_entry),
    }
}

pub struct Machine {
    config: MachineConfig,
    pub(crate) space: DataSpace,
    pub(crate) data_stack: Stack,
    pub(crate) return_stack: Stack,
    pub(crate) control_stack: Stack,
    exception_frames: Vec<ExceptionFrame>,
    pub(crate) state: InterpState,
    pub(crate) colon_mode: ColonMode,
    /// Parameter-field addresses of the BASE, UINCR and UTHRES variables.
    base_addr: usize,
    uincr_addr: usize,
    uthres_addr: usize,
    /// Two counted-string buffers inside the arena; WORD alternates between
    /// them so a caller can hold the previous word while parsing the next.
    word_bufs: [usize; 2],
    word_buf_sel: usize,
    /// Code-field address of LIT, cached for compiling numeric literals.
    lit_cfa: usize,
    /// The word most recently read by the outer interpreter, for diagnostics.
    pub(crate) last_word: Vec<u8>,
    /// Pending parse-error message reported when a QUIT unwind lands.
    pub(crate) parse_error: Option<String>,
    input: Box<dyn BufRead>,
    /// True when the last byte read was a newline, so error recovery knows
    /// the offending line has already been fully consumed.
    at_line_end: bool,
    pub(crate) output: Box<dyn Write>,
}

impl Machine {
    pub fn new(config: MachineConfig, input: Box<dyn BufRead>, output: Box<dyn Write>) -> Machine {
        let image = boot(&config);
        Machine {
            space: image.space,
            data_stack: Stack::new(StackKind::Data, config.data_stack_cells),
            return_stack: Stack::new(StackKind::Return, config.return_stack_cells),
            control_stack: Stack::new(StackKind::Control, config.control_stack_cells),
            exception_frames: Vec::with_capacity(MAX_EXCEPTION_FRAMES),
            state: InterpState::Interpret,
            colon_mode: ColonMode::Normal,
            config,
            base_addr: image.base_addr,
            uincr_addr: image.uincr_addr,
            uthres_addr: image.uthres_addr,
            word_bufs: image.word_bufs,
            word_buf_sel: 0,
            lit_cfa: image.lit_cfa,
            last_word: Vec::new(),
            parse_error: None,
            input,
            at_line_end: false,
            output,
        }
    }

    pub fn space(&self) -> &DataSpace {
        &self.space
    }

    pub fn data_cells(&self) -> &[Cell] {
        self.data_stack.as_slice()
    }

    pub fn state(&self) -> InterpState {
        self.state
    }

    /// Current numeric base: 0 means prefix-sensitive autodetection.
    pub(crate) fn base(&self) -> isize {
        self.space
            .arena()
            .fetch_cell(self.base_addr)
            .map(Cell::to_int)
            .unwrap_or(0)
    }

    /// The base used for numeric output; out-of-range values fall back to 10.
    pub(crate) fn output_base(&self) -> u32 {
        let base = self.base();
        if (2..=36).contains(&base) {
            base as u32
        } else {
            10
        }
    }

    // ------------------------------------------------------------------
    // Execution engine

    /// Run the word whose code field lives at `xt`. The guard cell stored
    /// before every code field is validated first so a corrupted or
    /// fabricated token raises an invalid-address throw instead of
    /// dispatching on garbage.
    pub fn execute(&mut self, xt: usize) -> Result<()> {
        let guard_ok = xt >= CELL
            && self
                .space
                .arena()
                .fetch_cell(xt - CELL)
                .map(|c| c.to_uint() == SENTINEL)
                .unwrap_or(false);
        if !guard_ok {
            debug!(xt, "invalid execution token");
            return Err(Exception::InvalidAddress.into());
        }
        let code = self.space.arena().fetch_cell(xt)?;
        let Some(code) = CodeField::decode(code, PRIMITIVES.len()) else {
            debug!(xt, code = code.to_int(), "unknown code field");
            return Err(Exception::InvalidAddress.into());
        };
        let pfa = cfa_to_pfa(xt);
        match code {
            CodeField::Colon => self.run_colon(pfa),
            CodeField::Constant | CodeField::Value => {
                let val = self.space.arena().fetch_cell(pfa)?;
                self.data_stack.push(val)?;
                Ok(())
            }
            CodeField::Variable => {
                self.data_stack.push(Cell::from_addr(pfa))?;
                Ok(())
            }
            CodeField::Primitive(ix) => (PRIMITIVES[ix].run)(self),
        }
    }

    // ------------------------------------------------------------------
    // Inner interpreter

    fn run_colon(&mut self, pfa: usize) -> Result<()> {
        // The mode register is per-invocation: a nested colon call must not
        // see or clobber its caller's pending mode.
        let saved = std::mem::replace(&mut self.colon_mode, ColonMode::Normal);
        let result = self.run_colon_body(pfa);
        self.colon_mode = saved;
        result
    }

    fn run_colon_body(&mut self, pfa: usize) -> Result<()> {
        let mut ix: isize = 0;
        loop {
            let addr = pfa as isize + ix * CELL as isize;
            if addr < 0 {
                return Err(Exception::InvalidAddress.into());
            }
            let cell = self.space.arena().fetch_cell(addr as usize)?;
            match self.colon_mode {
                ColonMode::Normal => {
                    // A zero cell is the EXIT marker terminating the body.
                    if cell.is_zero() {
                        return Ok(());
                    }
                    self.execute(cell.to_addr())?;
                }
                ColonMode::Skip => {
                    self.colon_mode = ColonMode::Normal;
                }
                ColonMode::Branch => {
                    // Signed cell-count offset relative to the offset cell
                    // itself; -1 compensates for the increment below.
                    ix += cell.to_int() - 1;
                    self.colon_mode = ColonMode::Normal;
                }
                ColonMode::Literal => {
                    self.data_stack.push(cell)?;
                    self.colon_mode = ColonMode::Normal;
                }
                ColonMode::StringLiteral => {
                    let len = cell.to_int();
                    if len < 0 {
                        return Err(Exception::InvalidAddress.into());
                    }
                    let len = len as usize;
                    let str_addr = addr as usize + CELL;
                    self.space.arena().slice(str_addr, len)?;
                    self.data_stack.push(Cell::from_addr(str_addr))?;
                    self.data_stack.push(Cell::from_uint(len))?;
                    // Step over the cell-aligned string bytes.
                    ix += (align_addr(len) / CELL) as isize;
                    self.colon_mode = ColonMode::Normal;
                }
            }
            ix += 1;
        }
    }

    // ------------------------------------------------------------------
    // Exceptions

    /// CATCH: run `xt` under a recovery frame. A THROW from inside rolls all
    /// three stacks back to the recorded depths and pushes the code; normal
    /// completion pushes 0. QUIT/ABORT/BYE bypass the frame entirely.
    pub fn catch(&mut self, xt: usize) -> Result<()> {
        if self.exception_frames.len() >= MAX_EXCEPTION_FRAMES {
            return Err(Exception::ExceptionStackOverflow.into());
        }
        self.exception_frames.push(ExceptionFrame {
            data_depth: self.data_stack.depth(),
            return_depth: self.return_stack.depth(),
            control_depth: self.control_stack.depth(),
        });
        let result = self.execute(xt);
        let frame = self.exception_frames.pop().expect("frame pushed above");
        match result {
            Ok(()) => {
                self.data_stack.push(Cell::ZERO)?;
                Ok(())
            }
            Err(Unwind::Throw(exc)) => {
                debug!(code = exc.code(), xt, "caught exception");
                self.data_stack.truncate(frame.data_depth);
                self.return_stack.truncate(frame.return_depth);
                self.control_stack.truncate(frame.control_depth);
                self.data_stack.push(Cell::from_int(exc.code()))?;
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// THROW: 0 is "no exception"; the ABORT and QUIT codes invoke those
    /// unwinds directly, everything else unwinds to the nearest CATCH.
    pub fn throw(&mut self, code: isize) -> Result<()> {
        match code {
            0 => Ok(()),
            EXC_ABORT | EXC_ABORTQ => Err(Unwind::Abort),
            EXC_QUIT => Err(Unwind::Quit),
            n => Err(Unwind::Throw(Exception::from_code(n))),
        }
    }

    // ------------------------------------------------------------------
    // Input

    /// Read one byte from the input source. End-of-input becomes `Bye(0)`,
    /// a read error `Bye(1)`; those are the process exit codes.
    pub(crate) fn key(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        loop {
            match self.input.read(&mut buf) {
                Ok(0) => return Err(Unwind::Bye(0)),
                Ok(_) => {
                    self.at_line_end = buf[0] == b'\n';
                    return Ok(buf[0]);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "input read failed");
                    return Err(Unwind::Bye(1));
                }
            }
        }
    }

    /// Discard the rest of the current input line (after ABORT/QUIT). Does
    /// nothing when the line's newline has already been consumed.
    fn drop_line(&mut self) -> Result<()> {
        while !self.at_line_end {
            self.key()?;
        }
        Ok(())
    }

    /// Parse one `delim`-delimited word into the next counted-string buffer
    /// and return the buffer's address. When the delimiter is space, any
    /// control character terminates the word too.
    pub(crate) fn parse_word(&mut self, delim: u8) -> Result<usize> {
        let blank_flexible = delim == b' ';
        let classify = |key: u8| {
            if blank_flexible && key < b' ' {
                delim
            } else {
                key
            }
        };
        let mut key = self.key()?;
        while classify(key) == delim {
            key = self.key()?;
        }
        let mut word = Vec::with_capacity(32);
        while classify(key) != delim {
            if word.len() >= MAX_COUNTED_STRING {
                return Err(Exception::StringOverflow.into());
            }
            word.push(key);
            key = self.key()?;
        }
        let addr = self.word_bufs[self.word_buf_sel];
        self.word_buf_sel = (self.word_buf_sel + 1) % self.word_bufs.len();
        let buf = self.space.arena_mut().slice_mut(addr, 1 + word.len())?;
        buf[0] = word.len() as u8;
        buf[1..].copy_from_slice(&word);
        Ok(addr)
    }

    /// Read the counted string at `caddr` out of the arena.
    pub(crate) fn counted_string(&self, caddr: usize) -> Result<Vec<u8>> {
        let len = self.space.arena().fetch_u8(caddr)? as usize;
        Ok(self.space.arena().slice(caddr + 1, len)?.to_vec())
    }

    // ------------------------------------------------------------------
    // Outer interpreter

    /// Append one cell to the current definition.
    pub(crate) fn compile_cell(&mut self, val: Cell) -> Result<()> {
        let addr = self.space.arena_mut().alloc(CELL)?;
        self.space.arena_mut().store_cell(addr, val)?;
        Ok(())
    }

    pub(crate) fn lit_cfa(&self) -> usize {
        self.lit_cfa
    }

    /// Interpret a single word from the parse area: look it up and execute
    /// or compile it, falling back to numeric parsing.
    pub fn interpret_word(&mut self) -> Result<()> {
        let caddr = self.parse_word(b' ')?;
        let name = self.counted_string(caddr)?;
        self.last_word = name.clone();

        if let Some(entry) = self.space.find(&name)? {
            let xt = entry_to_cfa(entry);
            if self.state == InterpState::Interpret && self.space.is_comp_only(entry)? {
                return Err(Exception::CompileOnlyWord.into());
            }
            if self.state == InterpState::Compile && !self.space.is_immediate(entry)? {
                return self.compile_cell(Cell::from_addr(xt));
            }
            return self.execute(xt);
        }

        // Not a word; try to read a number in the current base.
        let base = self.base();
        if base != 0 && !(2..=36).contains(&base) {
            return Err(Exception::InvalidNumber.into());
        }
        let (value, unconsumed) = parse_number(&name, base);
        if unconsumed == 0 {
            if self.state == InterpState::Compile {
                self.compile_cell(Cell::from_addr(self.lit_cfa))?;
                self.compile_cell(value)?;
            } else {
                self.data_stack.push(value)?;
            }
            Ok(())
        } else if unconsumed == name.len() {
            Err(Exception::UndefinedWord.into())
        } else {
            // Parsed some digits but not all: recoverable at line level.
            self.parse_error = Some(format!(
                "ignored trailing junk following number '{}'",
                String::from_utf8_lossy(&name)
            ));
            Err(Unwind::Quit)
        }
    }

    // ------------------------------------------------------------------
    // Run loop

    /// The interpreter's top level: reads words until end-of-input, handling
    /// the ABORT/QUIT/unhandled-THROW unwinds. Returns the process exit
    /// status.
    pub fn run(&mut self) -> i32 {
        loop {
            match self.interpret_word() {
                Ok(()) => {}
                Err(Unwind::Bye(status)) => return status,
                Err(Unwind::Quit) => {
                    if let Some(msg) = self.parse_error.take() {
                        warn!(parse_error = %msg, "QUIT");
                    } else {
                        debug!("QUIT: clearing return and control stacks");
                    }
                    self.return_stack.clear();
                    self.control_stack.clear();
                    self.exception_frames.clear();
                    if let Err(Unwind::Bye(status)) = self.drop_line() {
                        return status;
                    }
                }
                Err(Unwind::Abort) => {
                    warn!("ABORT: rebooting interpreter state");
                    if self.reboot().is_err() {
                        return 0;
                    }
                }
                Err(Unwind::Throw(exc)) => {
                    // No enclosing CATCH: report and take the ABORT path.
                    error!(
                        code = exc.code(),
                        word = %String::from_utf8_lossy(&self.last_word),
                        "unhandled exception: {}",
                        exc
                    );
                    if self.reboot().is_err() {
                        return 0;
                    }
                }
            }
            self.grow_if_needed();
        }
    }

    /// ABORT-level cold boot: tear down the data space and rebuild the boot
    /// dictionary, so a clobbered BASE or a half-compiled definition cannot
    /// outlive the line that broke it. Clears every stack, returns to
    /// interpret state and discards the rest of the input line. Errors only
    /// on end-of-input.
    fn reboot(&mut self) -> std::result::Result<(), ()> {
        let image = boot(&self.config);
        self.space = image.space;
        self.base_addr = image.base_addr;
        self.uincr_addr = image.uincr_addr;
        self.uthres_addr = image.uthres_addr;
        self.word_bufs = image.word_bufs;
        self.word_buf_sel = 0;
        self.lit_cfa = image.lit_cfa;
        self.data_stack.clear();
        self.return_stack.clear();
        self.control_stack.clear();
        self.exception_frames.clear();
        self.state = InterpState::Interpret;
        self.colon_mode = ColonMode::Normal;
        self.parse_error = None;
        match self.drop_line() {
            Ok(()) => Ok(()),
            Err(_) => Err(()),
        }
    }

    /// Grow the arena by UINCR when free space drops under UTHRES. Failures
    /// are reported by the arena and intentionally non-fatal.
    fn grow_if_needed(&mut self) {
        let threshold = self
            .space
            .arena()
            .fetch_cell(self.uthres_addr)
            .map(|c| c.to_uint())
            .unwrap_or(INIT_UTHRES);
        if self.space.arena().should_grow(threshold) {
            let incr = self
                .space
                .arena()
                .fetch_cell(self.uincr_addr)
                .map(|c| c.to_uint())
                .unwrap_or(INIT_UINCR);
            self.space.arena_mut().grow(incr);
        }
    }

    pub(crate) fn uincr(&self) -> usize {
        self.space
            .arena()
            .fetch_cell(self.uincr_addr)
            .map(|c| c.to_uint())
            .unwrap_or(INIT_UINCR)
    }
}

fn define_variable(space: &mut DataSpace, name: &[u8], initial: Cell) -> usize {
    space
        .create(name, 0, CodeField::Variable)
        .expect("bootstrap dictionary overflow");
    let addr = space.arena_mut().alloc(CELL).expect("bootstrap");
    space
        .arena_mut()
        .store_cell(addr, initial)
        .expect("variable cell just allocated");
    addr
}

fn define_constant(space: &mut DataSpace, name: &[u8], value: Cell) {
    space
        .create(name, 0, CodeField::Constant)
        .expect("bootstrap dictionary overflow");
    let addr = space.arena_mut().alloc(CELL).expect("bootstrap");
    space
        .arena_mut()
        .store_cell(addr, value)
        .expect("constant cell just allocated");
}

/// Parse `text` as an integer, returning the value and the number of bytes
/// left unconsumed. Base 0 autodetects `#` (decimal), `$` (hex), `%`
/// (binary), `'c'` character literals and C-style `0x`/`0X` hex, defaulting
/// to decimal. Nothing consumed is reported as `text.len()` unconsumed,
/// prefix included.
pub(crate) fn parse_number(text: &[u8], base: isize) -> (Cell, usize) {
    if text.is_empty() {
        return (Cell::ZERO, 0);
    }
    let mut ix = 0;
    let mut radix: u32 = 10;
    let mut prefixed = false;
    if base == 0 {
        match text[0] {
            b'#' => {
                ix = 1;
                prefixed = true;
            }
            b'$' => {
                ix = 1;
                radix = 16;
                prefixed = true;
            }
            b'%' => {
                ix = 1;
                radix = 2;
                prefixed = true;
            }
            b'\'' if text.len() == 3 && text[2] == b'\'' => {
                return (Cell::from_uint(text[1] as usize), 0);
            }
            _ => {}
        }
    } else {
        radix = base as u32;
    }
    let negative = match text.get(ix) {
        Some(b'-') => {
            ix += 1;
            true
        }
        Some(b'+') => {
            ix += 1;
            false
        }
        _ => false,
    };
    // The 0x prefix sits after the sign, as strtoul reads it.
    if base == 0
        && !prefixed
        && text.len() > ix + 1
        && text[ix] == b'0'
        && matches!(text[ix + 1], b'x' | b'X')
    {
        radix = 16;
        ix += 2;
    }
    let mut value: usize = 0;
    let mut digits = 0;
    while ix < text.len() {
        match (text[ix] as char).to_digit(radix) {
            Some(d) => {
                value = value.wrapping_mul(radix as usize).wrapping_add(d as usize);
                digits += 1;
                ix += 1;
            }
            None => break,
        }
    }
    if digits == 0 {
        return (Cell::ZERO, text.len());
    }
    let signed = if negative {
        (value as isize).wrapping_neg()
    } else {
        value as isize
    };
    (Cell::from_int(signed), text.len() - ix)
}

/// Render `value` in `radix` with uppercase digits above 9.
pub(crate) fn format_uint(mut value: usize, radix: u32) -> String {
    let mut digits = Vec::new();
    loop {
        let d = (value % radix as usize) as u32;
        digits.push(
            char::from_digit(d, radix)
                .expect("digit below radix")
                .to_ascii_uppercase(),
        );
        value /= radix as usize;
        if value == 0 {
            break;
        }
    }
    digits.iter().rev().collect()
}

pub(crate) fn format_int(value: isize, radix: u32) -> String {
    if value < 0 {
        format!("-{}", format_uint(value.unsigned_abs(), radix))
    } else {
        format_uint(value as usize, radix)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// A Write handle the test keeps a clone of while the machine owns the
    /// other end.
    #[derive(Clone, Default)]
    pub struct SharedOutput(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub fn machine_with_input(input: &str) -> (Machine, SharedOutput) {
        let out = SharedOutput::default();
        let machine = Machine::new(
            MachineConfig::default(),
            Box::new(Cursor::new(input.as_bytes().to_vec())),
            Box::new(out.clone()),
        );
        (machine, out)
    }

    pub fn output_string(out: &SharedOutput) -> String {
        String::from_utf8_lossy(&out.0.lock().unwrap()).into_owned()
    }
}
