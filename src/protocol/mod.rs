//! Line-oriented master/worker protocol.
//!
//! Every message is one UTF-8 line terminated by `\n`:
//!
//! | Direction       | Line              |
//! |-----------------|-------------------|
//! | master → worker | `concurrency: N`  |
//! | master → worker | `task:<desc>`     |
//! | master → worker | `NO_TASK`         |
//! | worker → master | `Task completed`  |

pub mod connection;
pub mod message;

pub use connection::{LineConnection, MAX_LINE_BYTES};
pub use message::Message;
