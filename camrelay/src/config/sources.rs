//! Camera source table loaded from TOML.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One configured camera source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceEntry {
    /// Full upstream URL (RTSP, MJPEG over HTTP, ...).
    pub url: Option<String>,
    /// Hostname of an mjpg-streamer style device, used when `url` is absent.
    pub host: Option<String>,
    /// Free-form description of the feed format, reported as-is.
    pub video_type: Option<String>,
}

/// Contents of the `SOURCES_FILE`.
///
/// ```toml
/// [sources.ada]
/// url = "rtsp://10.0.0.5:554/live/ch0"
///
/// [sources.um3]
/// host = "um3.lab.example"
/// video_type = "MJPEG"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesFile {
    pub sources: BTreeMap<String, SourceEntry>,
}

impl SourcesFile {
    /// Parse a sources table from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        let file: Self = toml::from_str(text)?;
        for (name, entry) in &file.sources {
            if !crate::utils::stream_name::is_valid_stream_name(name) {
                return Err(Error::config(format!(
                    "source name {name:?} may only contain letters, digits, '-' and '_'"
                )));
            }
            if entry.url.is_none() && entry.host.is_none() {
                tracing::warn!(
                    source = %name,
                    "Source has neither url nor host; the URL template will be used"
                );
            }
        }
        Ok(file)
    }

    /// Read and parse a sources file.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io_path("reading sources file", path, e))?;
        Self::parse(&text)
    }
}
