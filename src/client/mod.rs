//! Client-side session plumbing
//!
//! The [`session::SessionManager`] owns one credential's renewal
//! schedule and inactivity clock; the [`transport::AuthenticatedClient`]
//! consults it before every dispatch and retries once after a renewal.

pub mod session;
pub mod transport;

pub use session::{Credential, SessionError, SessionManager, SessionOptions, SessionState};
pub use transport::{AuthenticatedClient, ClientError};
