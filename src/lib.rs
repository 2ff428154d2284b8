//! An indirect-threaded Forth interpreter.
//!
//! The machine keeps all Forth-visible memory in a single growable arena
//! ([`arena`]); addresses handed to Forth code are byte offsets into it, so
//! the arena can relocate when it grows without breaking anything. The
//! dictionary ([`dict`]) is a linked chain of entries threaded through that
//! arena, the execution engine and both interpreters live in [`vm`], and the
//! primitive words in [`prims`].
//!
//! Embedding the interpreter takes a [`MachineConfig`] and two I/O handles:
//!
//! ```no_run
//! use std::io;
//! use forthright::{Machine, MachineConfig};
//!
//! let stdin = io::stdin();
//! let mut machine = Machine::new(
//!     MachineConfig::default(),
//!     Box::new(stdin.lock()),
//!     Box::new(io::stdout()),
//! );
//! let status = machine.run();
//! ```

pub mod arena;
pub mod cell;
pub mod dict;
pub mod exception;
pub mod prims;
pub mod stack;
pub mod vm;

pub use cell::{Cell, CELL};
pub use exception::{Exception, Unwind};
pub use vm::{Machine, MachineConfig};
