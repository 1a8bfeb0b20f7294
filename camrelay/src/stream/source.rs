//! Upstream source resolution.
//!
//! Maps a stream name to the URL the transcoder should pull from. The
//! lifecycle manager treats the result as an opaque string.

use std::collections::BTreeMap;

use crate::config::{SourceEntry, SourcesFile};

/// Placeholder substituted with the stream name in URL templates.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Resolves stream names to upstream media URLs.
pub trait SourceResolver: Send + Sync {
    /// URL for `name`, or `None` when the stream is not known.
    fn resolve(&self, name: &str) -> Option<String>;

    /// Opaque description of the feed format, if configured.
    fn video_type(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Resolver backed by the sources file and an optional URL template.
#[derive(Debug, Clone, Default)]
pub struct StaticSourceResolver {
    sources: BTreeMap<String, SourceEntry>,
    template: Option<String>,
}

impl StaticSourceResolver {
    pub fn new(sources: SourcesFile, template: Option<String>) -> Self {
        Self {
            sources: sources.sources,
            template,
        }
    }

    /// Names explicitly listed in the sources file.
    pub fn configured_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    fn from_template(&self, name: &str) -> Option<String> {
        self.template
            .as_ref()
            .map(|template| template.replace(NAME_PLACEHOLDER, name))
    }
}

impl SourceResolver for StaticSourceResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        match self.sources.get(name) {
            Some(SourceEntry { url: Some(url), .. }) => Some(url.clone()),
            Some(SourceEntry {
                host: Some(host), ..
            }) => Some(format!("http://{host}:8080/?action=stream")),
            _ => self.from_template(name),
        }
    }

    fn video_type(&self, name: &str) -> Option<String> {
        self.sources.get(name).and_then(|s| s.video_type.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(template: Option<&str>) -> StaticSourceResolver {
        let file = SourcesFile::parse(
            r#"
            [sources.ada]
            url = "rtsp://10.0.0.5:554/live/ch0"

            [sources.um3]
            host = "um3.lab.example"
            video_type = "MJPEG"

            [sources.bare]
            "#,
        )
        .unwrap();
        StaticSourceResolver::new(file, template.map(str::to_string))
    }

    #[test]
    fn test_explicit_url_wins() {
        let r = resolver(Some("http://{name}.lab:8080/"));
        assert_eq!(r.resolve("ada").as_deref(), Some("rtsp://10.0.0.5:554/live/ch0"));
    }

    #[test]
    fn test_host_expands_to_mjpeg_streamer_url() {
        let r = resolver(None);
        assert_eq!(
            r.resolve("um3").as_deref(),
            Some("http://um3.lab.example:8080/?action=stream")
        );
        assert_eq!(r.video_type("um3").as_deref(), Some("MJPEG"));
        assert_eq!(r.video_type("ada"), None);
    }

    #[test]
    fn test_template_fallback() {
        let r = resolver(Some("http://{name}.lab:8080/?action=stream"));
        assert_eq!(
            r.resolve("cam7").as_deref(),
            Some("http://cam7.lab:8080/?action=stream")
        );
        assert_eq!(
            r.resolve("bare").as_deref(),
            Some("http://bare.lab:8080/?action=stream")
        );
    }

    #[test]
    fn test_unknown_without_template() {
        let r = resolver(None);
        assert_eq!(r.resolve("cam7"), None);
        assert_eq!(r.resolve("bare"), None);
        assert_eq!(r.configured_names().count(), 3);
    }
}
