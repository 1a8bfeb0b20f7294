//! On-demand stream lifecycle.
//!
//! A stream exists only while someone watches it: the first request
//! launches a transcoder, later requests share it, and the sweeper tears
//! it down once requests stop.

pub mod launcher;
pub mod manager;
pub mod readiness;
pub mod registry;
pub mod source;
pub mod sweeper;

pub use launcher::{FfmpegLauncher, LaunchRequest, Launcher, TranscoderProcess};
pub use manager::{ReadyStream, StopOutcome, StreamManager};
pub use registry::{StreamPhase, StreamRegistry, StreamSnapshot, StreamState};
pub use source::{SourceResolver, StaticSourceResolver};
pub use sweeper::StaleSweeper;
