//! Throw codes and the unwinding model.
//!
//! The original design used `longjmp` targets for ABORT and QUIT and a frame
//! stack of `jmp_buf`s for CATCH/THROW. Here the non-local jumps become an
//! [`Unwind`] error value propagated with `?` through every interpreter
//! layer; CATCH intercepts `Unwind::Throw` and rolls the stacks back, while
//! `Quit`, `Abort` and `Bye` pass through to the top-level run loop.
//!
//! Codes follow the ANS THROW convention (-1 ABORT, -4 data stack underflow,
//! -13 undefined word, ...).

use thiserror::Error;

/// Maximum number of nested CATCH frames.
pub const MAX_EXCEPTION_FRAMES: usize = 32;

pub const EXC_ABORT: isize = -1;
pub const EXC_ABORTQ: isize = -2;
pub const EXC_QUIT: isize = -56;

/// A throwable condition. Each variant knows its ANS-style code; codes the VM
/// never raises itself are carried through [`Exception::Other`] untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Exception {
    #[error("data stack overflow")]
    DataStackOverflow,
    #[error("data stack underflow")]
    DataStackUnderflow,
    #[error("return stack overflow")]
    ReturnStackOverflow,
    #[error("return stack underflow")]
    ReturnStackUnderflow,
    #[error("dictionary overflow")]
    DictionaryOverflow,
    #[error("invalid memory address")]
    InvalidAddress,
    #[error("division by zero")]
    DivisionByZero,
    #[error("unrecognised word")]
    UndefinedWord,
    #[error("interpreting a compile-only word")]
    CompileOnlyWord,
    #[error("attempt to use zero-length string as a name")]
    EmptyName,
    #[error("parsed string overflow")]
    StringOverflow,
    #[error("definition name too long")]
    NameTooLong,
    #[error("invalid numeric argument")]
    InvalidNumber,
    #[error("control-flow stack overflow")]
    ControlStackOverflow,
    #[error("control-flow stack underflow")]
    ControlStackUnderflow,
    #[error("exception stack overflow")]
    ExceptionStackOverflow,
    #[error("exception: {0}")]
    Other(isize),
}

impl Exception {
    pub fn code(&self) -> isize {
        match self {
            Exception::DataStackOverflow => -3,
            Exception::DataStackUnderflow => -4,
            Exception::ReturnStackOverflow => -5,
            Exception::ReturnStackUnderflow => -6,
            Exception::DictionaryOverflow => -8,
            Exception::InvalidAddress => -9,
            Exception::DivisionByZero => -10,
            Exception::UndefinedWord => -13,
            Exception::CompileOnlyWord => -14,
            Exception::EmptyName => -16,
            Exception::StringOverflow => -18,
            Exception::NameTooLong => -19,
            Exception::InvalidNumber => -24,
            Exception::ControlStackUnderflow => -22,
            Exception::ControlStackOverflow => -52,
            Exception::ExceptionStackOverflow => -53,
            Exception::Other(n) => *n,
        }
    }

    /// Map a raw THROW code back to the condition it names. ABORT and QUIT
    /// codes never reach this; `Machine::throw` special-cases them first.
    pub fn from_code(code: isize) -> Exception {
        match code {
            -3 => Exception::DataStackOverflow,
            -4 => Exception::DataStackUnderflow,
            -5 => Exception::ReturnStackOverflow,
            -6 => Exception::ReturnStackUnderflow,
            -8 => Exception::DictionaryOverflow,
            -9 => Exception::InvalidAddress,
            -10 => Exception::DivisionByZero,
            -13 => Exception::UndefinedWord,
            -14 => Exception::CompileOnlyWord,
            -16 => Exception::EmptyName,
            -18 => Exception::StringOverflow,
            -19 => Exception::NameTooLong,
            -24 => Exception::InvalidNumber,
            -22 => Exception::ControlStackUnderflow,
            -52 => Exception::ControlStackOverflow,
            -53 => Exception::ExceptionStackOverflow,
            n => Exception::Other(n),
        }
    }
}

/// Non-local control flow bubbling out of a primitive.
///
/// `Throw` unwinds to the nearest CATCH; `Quit` and `Abort` bypass CATCH by
/// design and reach the run loop; `Bye` carries the process exit status on
/// end-of-input or an explicit BYE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unwind {
    Throw(Exception),
    Quit,
    Abort,
    Bye(i32),
}

impl From<Exception> for Unwind {
    fn from(e: Exception) -> Unwind {
        Unwind::Throw(e)
    }
}

pub type Result<T> = std::result::Result<T, Unwind>;

/// Snapshot of the three stack depths taken by CATCH before running the
/// protected token. Single-use: consumed by the nearest THROW or discarded on
/// normal return.
#[derive(Debug, Copy, Clone)]
pub struct ExceptionFrame {
    pub data_depth: usize,
    pub return_depth: usize,
    pub control_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for exc in [
            Exception::DataStackOverflow,
            Exception::DataStackUnderflow,
            Exception::ReturnStackOverflow,
            Exception::ReturnStackUnderflow,
            Exception::DictionaryOverflow,
            Exception::InvalidAddress,
            Exception::DivisionByZero,
            Exception::UndefinedWord,
            Exception::CompileOnlyWord,
            Exception::EmptyName,
            Exception::StringOverflow,
            Exception::NameTooLong,
            Exception::InvalidNumber,
            Exception::ControlStackUnderflow,
            Exception::ControlStackOverflow,
            Exception::ExceptionStackOverflow,
        ] {
            assert_eq!(Exception::from_code(exc.code()), exc);
        }
    }

    #[test]
    fn test_unknown_code_is_carried() {
        assert_eq!(Exception::from_code(-77), Exception::Other(-77));
        assert_eq!(Exception::Other(-77).code(), -77);
        assert_eq!(Exception::from_code(42), Exception::Other(42));
    }
}
