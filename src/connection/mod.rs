//! Connection layer.
//!
//! - [`Connection`]: public handle (connect, close, send, ping, state)
//! - [`machine`]: pure transition function over [`ConnectionState`]
//! - `manager`: the task that applies transitions and owns the transport
//! - [`CountdownTimer`]: cancellable one-shot timer
//! - [`ClientOptions`]: configuration

mod handle;
pub mod machine;
mod manager;
mod options;
mod state;
mod timer;

pub use handle::{Connection, InboundMessages};
pub use manager::ConnectionSnapshot;
pub use options::{ClientOptions, ClientOptionsBuilder};
pub use state::{ConnectionState, ConnectionStateChange, ConnectionStateKind};
pub use timer::CountdownTimer;
