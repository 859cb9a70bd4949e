//! Credentials and the renewal bridge.

mod credential;
mod renewal;

pub use credential::Credential;
pub use renewal::{AuthOptions, AuthRenewal};
