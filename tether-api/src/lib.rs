//! Tether API - Shared types for driving interactive agent subprocesses.

mod event;
mod block;
mod command;

pub use event::*;
pub use block::*;
pub use command::*;
