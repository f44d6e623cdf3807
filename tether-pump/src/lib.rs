//! Tether Pump - output draining, decoding and classification.
//!
//! The Pump is the middleman between a subprocess's terminal and the engine:
//! it turns raw PTY bytes into ordered text chunks and sniffs each chunk for
//! recognizable UI states.

pub mod pipe;
pub mod sniffer;

pub use pipe::{LineAssembler, Pump, PumpMessage, StreamDecoder};
pub use sniffer::{BUILTIN_PATTERNS, PatternError, PatternRegistry, PatternRule, priority};
