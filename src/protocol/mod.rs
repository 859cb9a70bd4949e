//! Protocol message shapes and the recovery key format.
//!
//! The byte-level codec belongs to the transport; this module only defines
//! the structured messages the connection layer reasons about.

mod message;
mod recovery;

pub use message::*;
pub use recovery::*;
