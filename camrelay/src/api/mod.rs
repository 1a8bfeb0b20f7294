//! HTTP surface of the relay.
//!
//! Manifest requests bring streams up on demand; segment requests and the
//! management endpoints never start anything.

pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, AppState};
