//! Shell - command lines to pipeline runs
//!
//! - `parser`: quoting-aware tokenizer splitting a line into pipeline stages
//! - `commands`: callables registered by the host
//! - `dispatcher`: runs the stages, threading stdout into the next stdin

pub mod commands;
pub mod dispatcher;
pub mod parser;

pub use commands::{
    Command, CommandError, CommandFn, CommandOutput, CommandRegistry, CommandResult, Completion,
};
pub use dispatcher::{DispatchError, DispatchResult, Dispatcher};
pub use parser::{ParseWarning, Pipeline, SimpleCommand, parse};
