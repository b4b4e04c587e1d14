//! Change log view
//!
//! Every mutation written by the file backend is appended to `log.json` as a
//! pair of JSON lines: an operation marker followed by the entry it applies
//! to. This module parses that format, replays it into a key table and tails
//! a live log for debugging.
//!
//! ```text
//! {"op":"set","id":1}
//! {"k":"filestream::in::src","v":{"ttl":-1,"updated":[0,0],"cursor":{"offset":42}}}
//! {"op":"remove","id":2}
//! {"k":"filestream::in::src"}
//! ```

mod replay;
mod tail;
mod types;

pub use replay::{Applied, Replay};
pub use tail::{Change, Tailer};
pub use types::{Checkpoint, EntryLine, LogLine, OpKind, OpLine};

#[cfg(test)]
mod tests;
