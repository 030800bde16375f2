//! LLVM IR code generation.
//!
//! IR is generated as text into two `String` sinks: the main sink holds the
//! module header, user functions, and trailer; the globals sink collects
//! global-variable declarations and is spliced over the placeholder line in
//! the main sink once parsing finishes.
//!
//! # Register and label discipline
//!
//! Virtual registers are numbered per function, strictly increasing, and each
//! `%N` is the destination of exactly one instruction. Labels are numbered
//! over the whole program and rendered as `L<n>`.
//!
//! # Pointer depth
//!
//! Every value carries a pointer depth: the number of loads between it and a
//! plain integer of its width. Loads decrease the depth by one, address-of
//! increases it, and a store's destination is always one deeper than the
//! value being stored.
//!
//! # Module structure
//!
//! - `state.rs`: emitter state, `LLVMValue`, `StackEntry`
//! - `ops.rs`: loads/stores, arithmetic, comparison, width resizing
//! - `control_flow.rs`: labels, jumps, `if`/`while` lowering
//! - `statements.rs`: the AST walker, `print`, `return`, calls
//! - `program.rs`: module and function preambles/postambles, globals
//! - `platform.rs`: target datalayout/triple probe

mod control_flow;
mod ops;
mod platform;
mod program;
mod state;
mod statements;

pub use platform::{Platform, get_temp_dir};
pub use state::{CodeGen, GLOBALS_PLACEHOLDER, LABEL_PREFIX, LLVMValue, Register, StackEntry};
