//! Stream manager: request coalescing and the launch sequence.
//!
//! [`StreamManager::resolve_and_touch`] is the only way a request brings a
//! stream into service. The first request for a name inserts a placeholder
//! and spawns the launch sequence (clear output, launch, wait for the
//! manifest); every request, the first included, then waits on the entry's
//! state channel. Launch and teardown both run in their own tasks so a
//! client that disconnects midway cannot strand an entry.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::StartError;
use crate::utils::stream_name::is_valid_stream_name;
use crate::{Error, Result};

use super::launcher::{self, LaunchRequest, Launcher, TranscoderProcess};
use super::readiness::{self, ReadinessPolicy};
use super::registry::{
    Placeholder, Retired, StartTicket, StreamEntry, StreamRegistry, StreamSnapshot, StreamState,
};

/// A stream whose manifest exists and may be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyStream {
    pub name: String,
    pub manifest_path: PathBuf,
}

/// Result of [`StreamManager::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The transcoder was terminated and the entry removed.
    Stopped,
    /// The stream is still starting (or already stopping) and was left alone.
    Busy,
    /// No entry exists for the name.
    NotFound,
}

/// Coordinates stream starts, access tracking and teardown.
#[derive(Clone)]
pub struct StreamManager {
    registry: Arc<StreamRegistry>,
    launcher: Arc<dyn Launcher>,
    config: Arc<StreamConfig>,
    /// Fired by [`StreamManager::shutdown`]; no stream starts afterwards.
    closed: CancellationToken,
}

impl StreamManager {
    pub fn new(config: StreamConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            registry: Arc::new(StreamRegistry::new()),
            launcher,
            config: Arc::new(config),
            closed: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Whether [`StreamManager::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Bring `name` to the ready state (starting it if needed) and record
    /// the access.
    ///
    /// Concurrent calls for the same name share a single launch; all of
    /// them observe its outcome. Fails with [`Error::ShuttingDown`] once the
    /// manager is closed.
    pub async fn resolve_and_touch(&self, name: &str, source_url: &str) -> Result<ReadyStream> {
        if !is_valid_stream_name(name) {
            return Err(Error::InvalidStreamName(name.to_string()));
        }

        loop {
            if self.is_closed() {
                return Err(Error::ShuttingDown);
            }

            let mut state = match self.registry.insert_placeholder(name, source_url) {
                Placeholder::Inserted { ticket, state } => {
                    // Lost a race with shutdown's drain.
                    if self.is_closed() {
                        self.registry.remove_generation(name, ticket.generation());
                        return Err(Error::ShuttingDown);
                    }
                    self.spawn_start(ticket, source_url.to_string());
                    state
                }
                Placeholder::Existing(state) => state,
            };

            let outcome = state
                .wait_for(|s| matches!(s, StreamState::Ready | StreamState::Failed(_)))
                .await
                .map(|s| s.clone());

            match outcome {
                Ok(StreamState::Ready) => {
                    if self.registry.touch(name) {
                        return Ok(ReadyStream {
                            name: name.to_string(),
                            manifest_path: launcher::manifest_path(&self.config.output_dir, name),
                        });
                    }
                    debug!(stream = %name, "Stream retired before it could be served, retrying");
                }
                Ok(StreamState::Failed(error)) => return Err(Error::start(name, error)),
                Ok(StreamState::Starting | StreamState::Terminating) => {}
                Err(_) => {
                    debug!(stream = %name, "Stream entry went away while waiting, retrying");
                }
            }
        }
    }

    /// Record an access to a ready stream without starting anything.
    pub fn touch(&self, name: &str) -> bool {
        self.registry.touch(name)
    }

    /// Snapshot of every registered stream.
    pub fn list(&self) -> Vec<StreamSnapshot> {
        let mut streams = self.registry.snapshot();
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        streams
    }

    /// Path of a segment file belonging to `name`.
    pub fn segment_path(&self, name: &str, segment: &str) -> PathBuf {
        launcher::stream_dir(&self.config.output_dir, name).join(segment)
    }

    /// Stop a ready stream immediately.
    pub async fn stop(&self, name: &str) -> StopOutcome {
        match self.registry.retire(name) {
            Some(retired) => {
                info!(stream = %name, "Stopping stream on request");
                self.reclaim(retired).await;
                StopOutcome::Stopped
            }
            None if self.registry.get(name).is_some() => StopOutcome::Busy,
            None => StopOutcome::NotFound,
        }
    }

    /// Terminate a retired stream's transcoder, delete its output and drop
    /// the entry.
    ///
    /// The teardown runs in its own task: dropping this future only stops
    /// waiting for it, the entry still leaves `Terminating`.
    pub(crate) async fn reclaim(&self, retired: Retired) {
        let manager = self.clone();
        let name = retired.name.clone();
        let teardown = tokio::spawn(async move { manager.finish_reclaim(retired).await });
        if let Err(e) = teardown.await {
            warn!(stream = %name, error = %e, "Stream teardown task failed");
        }
    }

    async fn finish_reclaim(&self, retired: Retired) {
        if let Some(process) = retired.process {
            process.terminate(self.config.terminate_timeout).await;
        }
        launcher::remove_artifacts(&self.config.output_dir, &retired.name).await;
        self.registry
            .remove_generation(&retired.name, retired.generation);
    }

    /// Close the manager and terminate every stream. Used at service
    /// shutdown.
    pub async fn shutdown(&self) {
        self.closed.cancel();
        let entries = self.registry.drain();
        if entries.is_empty() {
            return;
        }
        info!(count = entries.len(), "Terminating all streams");
        join_all(entries.into_iter().map(|entry| self.discard(entry))).await;
    }

    async fn discard(&self, mut entry: StreamEntry) {
        if let Some(process) = entry.take_process() {
            process.terminate(self.config.terminate_timeout).await;
        }
        launcher::remove_artifacts(&self.config.output_dir, entry.name()).await;
    }

    fn spawn_start(&self, ticket: StartTicket, source_url: String) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_start(ticket, source_url).await;
        });
    }

    async fn run_start(&self, ticket: StartTicket, source_url: String) {
        let request = LaunchRequest::new(ticket.name(), source_url, &self.config.output_dir);

        let outcome = tokio::select! {
            _ = self.closed.cancelled() => {
                // Dropping the launch future kills any child it spawned.
                debug!(stream = %request.name, "Manager closed, abandoning start");
                launcher::remove_artifacts(&request.output_root, &request.name).await;
                return;
            }
            outcome = self.start_transcoder(&request) => outcome,
        };

        match outcome {
            Ok(process) => {
                let pid = process.id();
                match self.registry.set_ready(&ticket, process) {
                    Ok(()) => info!(stream = %request.name, ?pid, "Stream ready"),
                    Err(process) => {
                        // Entry removed under us (service shutdown); the
                        // process is still ours to stop.
                        warn!(stream = %request.name, "Stream removed while starting, discarding transcoder");
                        process.terminate(self.config.terminate_timeout).await;
                    }
                }
            }
            Err(error) => {
                warn!(stream = %request.name, error = %error, "Stream failed to start");
                self.registry.fail(&ticket, error);
            }
        }
    }

    async fn start_transcoder(
        &self,
        request: &LaunchRequest,
    ) -> std::result::Result<TranscoderProcess, StartError> {
        launcher::clear_artifacts(&request.output_root, &request.name).await?;

        let mut process = match self.launcher.launch(request).await {
            Ok(process) => process,
            Err(error) => {
                launcher::remove_artifacts(&request.output_root, &request.name).await;
                return Err(error);
            }
        };

        let policy = ReadinessPolicy {
            poll_interval: self.config.poll_interval,
            timeout: self.config.ready_timeout,
        };
        if let Err(error) =
            readiness::wait_for_manifest(&request.manifest_path(), &mut process, policy).await
        {
            process.terminate(self.config.terminate_timeout).await;
            launcher::remove_artifacts(&request.output_root, &request.name).await;
            return Err(error);
        }

        Ok(process)
    }
}
