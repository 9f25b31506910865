//! A reader for the evemu text format: a device description (`N:`, `I:`, `P:`, `B:`, `A:`,
//! `L:`, `S:` lines) optionally followed by a recording of timestamped events (`E:` lines).

mod descriptor;
mod error;
mod event;

pub use descriptor::*;
pub use error::*;
pub use event::*;
