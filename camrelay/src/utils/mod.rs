//! Small shared helpers.

pub mod fs;
pub mod stream_name;
