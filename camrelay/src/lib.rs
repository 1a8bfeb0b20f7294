//! camrelay - on-demand HLS relay for networked camera feeds.
//!
//! A camera's transcoder runs only while somebody is watching: the first
//! manifest request starts it, concurrent requests share it, and it is
//! torn down once requests stop arriving.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod stream;
pub mod utils;

pub use error::{Error, Result, StartError};
