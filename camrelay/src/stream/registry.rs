//! Stream registry.
//!
//! The single source of truth for which streams exist. Each name maps to
//! at most one [`StreamEntry`]; all mutation goes through the methods
//! below, each atomic with respect to the others thanks to the per-key
//! locking of the underlying [`DashMap`]. No guard ever escapes a method,
//! so callers cannot hold the map across an `.await`.
//!
//! Every placeholder is stamped with a generation number. Operations that
//! complete or abandon a start ([`StreamRegistry::set_ready`],
//! [`StreamRegistry::fail`]) and retirement only touch the entry they
//! were issued for, never a newer entry that reused the same name.
//!
//! Reclaiming a stream is two-phase: [`StreamRegistry::retire_if_idle`]
//! (or [`StreamRegistry::retire`]) flips a `Ready` entry to `Terminating`
//! and hands its process to exactly one caller; the entry stays in the map
//! until [`StreamRegistry::remove_generation`] runs after the process is
//! gone. A request arriving in between waits instead of launching a
//! second transcoder into the same output directory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::StartError;

use super::launcher::TranscoderProcess;

/// Lifecycle state of a stream entry as observed by waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// A launch sequence is in flight.
    Starting,
    /// The manifest exists and the transcoder is attached.
    Ready,
    /// The process is being torn down; the entry disappears afterwards.
    Terminating,
    /// The launch failed; published just before the entry is removed.
    Failed(StartError),
}

/// Serializable phase of a live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPhase {
    Starting,
    Ready,
    Terminating,
}

/// One active or starting stream.
#[derive(Debug)]
pub struct StreamEntry {
    name: String,
    source_url: String,
    generation: u64,
    created_at: Instant,
    last_access: Instant,
    state: watch::Sender<StreamState>,
    process: Option<TranscoderProcess>,
}

impl StreamEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), StreamState::Ready)
    }

    pub fn phase(&self) -> StreamPhase {
        match *self.state.borrow() {
            StreamState::Ready => StreamPhase::Ready,
            StreamState::Terminating => StreamPhase::Terminating,
            StreamState::Starting | StreamState::Failed(_) => StreamPhase::Starting,
        }
    }

    /// Take ownership of the transcoder, leaving the entry without one.
    pub fn take_process(&mut self) -> Option<TranscoderProcess> {
        self.process.take()
    }
}

/// A stream taken out of service by [`StreamRegistry::retire`] or
/// [`StreamRegistry::retire_if_idle`].
///
/// Holds the only handle to the transcoder; the entry itself remains in
/// the registry as `Terminating` until [`StreamRegistry::remove_generation`].
#[derive(Debug)]
pub struct Retired {
    pub name: String,
    pub generation: u64,
    pub process: Option<TranscoderProcess>,
}

/// Point-in-time copy of an entry's bookkeeping, without the process.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub name: String,
    pub source_url: String,
    pub generation: u64,
    pub phase: StreamPhase,
    pub pid: Option<u32>,
    pub created_at: Instant,
    pub last_access: Instant,
}

impl StreamSnapshot {
    /// Time since the last serving request, as seen at `now`.
    pub fn idle_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access)
    }
}

/// Proof that the holder inserted a placeholder and owns its launch.
///
/// Not `Clone`: exactly one launch sequence exists per placeholder.
#[derive(Debug)]
pub struct StartTicket {
    name: String,
    generation: u64,
}

impl StartTicket {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Outcome of [`StreamRegistry::insert_placeholder`].
#[derive(Debug)]
pub enum Placeholder {
    /// This caller created the entry and must run the launch sequence.
    Inserted {
        ticket: StartTicket,
        state: watch::Receiver<StreamState>,
    },
    /// An entry already exists; wait on its state.
    Existing(watch::Receiver<StreamState>),
}

/// Concurrent map from stream name to [`StreamEntry`].
#[derive(Debug, Default)]
pub struct StreamRegistry {
    entries: DashMap<String, StreamEntry>,
    next_generation: AtomicU64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the entry for `name`, if any.
    pub fn get(&self, name: &str) -> Option<StreamSnapshot> {
        self.entries.get(name).map(|entry| snapshot_of(&entry))
    }

    /// Create a `Starting` entry for `name` unless one already exists.
    pub fn insert_placeholder(&self, name: &str, source_url: &str) -> Placeholder {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(occupied) => Placeholder::Existing(occupied.get().state.subscribe()),
            Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
                let now = Instant::now();
                let (tx, rx) = watch::channel(StreamState::Starting);
                vacant.insert(StreamEntry {
                    name: name.to_string(),
                    source_url: source_url.to_string(),
                    generation,
                    created_at: now,
                    last_access: now,
                    state: tx,
                    process: None,
                });
                Placeholder::Inserted {
                    ticket: StartTicket {
                        name: name.to_string(),
                        generation,
                    },
                    state: rx,
                }
            }
        }
    }

    /// Attach the transcoder and publish `Ready`.
    ///
    /// Hands the process back when the ticket's entry no longer exists
    /// (stopped or evicted mid-start); the caller still owns it then.
    pub fn set_ready(
        &self,
        ticket: &StartTicket,
        process: TranscoderProcess,
    ) -> Result<(), TranscoderProcess> {
        match self.entries.get_mut(&ticket.name) {
            Some(mut entry)
                if entry.generation == ticket.generation
                    && matches!(*entry.state.borrow(), StreamState::Starting) =>
            {
                entry.process = Some(process);
                entry.last_access = Instant::now();
                entry.state.send_replace(StreamState::Ready);
                Ok(())
            }
            _ => Err(process),
        }
    }

    /// Publish a start failure to every waiter and drop the placeholder.
    pub fn fail(&self, ticket: &StartTicket, error: StartError) -> Option<StreamEntry> {
        self.entries
            .remove_if(&ticket.name, |_, entry| {
                if entry.generation != ticket.generation {
                    return false;
                }
                entry.state.send_replace(StreamState::Failed(error.clone()));
                true
            })
            .map(|(_, entry)| entry)
    }

    /// Record a serving request. Returns `false` when no `Ready` entry exists.
    pub fn touch(&self, name: &str) -> bool {
        match self.entries.get_mut(name) {
            Some(mut entry) if entry.is_ready() => {
                entry.last_access = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Remove the entry for `name`, transferring it to the caller.
    pub fn remove(&self, name: &str) -> Option<StreamEntry> {
        self.entries.remove(name).map(|(_, entry)| entry)
    }

    /// Retire `name` if it is still the same `Ready` entry and still idle.
    ///
    /// The idle check is repeated under the key's lock, so a `touch` that
    /// lands between the sweeper's snapshot and this call keeps the entry.
    pub fn retire_if_idle(
        &self,
        name: &str,
        generation: u64,
        threshold: Duration,
        now: Instant,
    ) -> Option<Retired> {
        let mut entry = self.entries.get_mut(name)?;
        if entry.generation != generation
            || !entry.is_ready()
            || now.saturating_duration_since(entry.last_access) <= threshold
        {
            return None;
        }
        Some(retire_entry(&mut entry))
    }

    /// Retire the `Ready` entry for `name` regardless of idleness.
    pub fn retire(&self, name: &str) -> Option<Retired> {
        let mut entry = self.entries.get_mut(name)?;
        if !entry.is_ready() {
            return None;
        }
        Some(retire_entry(&mut entry))
    }

    /// Remove the entry for `name` if it still has `generation`.
    pub fn remove_generation(&self, name: &str, generation: u64) -> Option<StreamEntry> {
        self.entries
            .remove_if(name, |_, entry| entry.generation == generation)
            .map(|(_, entry)| entry)
    }

    /// Snapshot of every entry.
    pub fn snapshot(&self) -> Vec<StreamSnapshot> {
        self.entries.iter().map(|entry| snapshot_of(&entry)).collect()
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<StreamEntry> {
        let names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.iter().filter_map(|name| self.remove(name)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn retire_entry(entry: &mut StreamEntry) -> Retired {
    entry.state.send_replace(StreamState::Terminating);
    Retired {
        name: entry.name.clone(),
        generation: entry.generation,
        process: entry.process.take(),
    }
}

fn snapshot_of(entry: &StreamEntry) -> StreamSnapshot {
    StreamSnapshot {
        name: entry.name.clone(),
        source_url: entry.source_url.clone(),
        generation: entry.generation,
        phase: entry.phase(),
        pid: entry.process.as_ref().and_then(TranscoderProcess::id),
        created_at: entry.created_at,
        last_access: entry.last_access,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inserted(placeholder: Placeholder) -> (StartTicket, watch::Receiver<StreamState>) {
        match placeholder {
            Placeholder::Inserted { ticket, state } => (ticket, state),
            Placeholder::Existing(_) => panic!("expected a fresh placeholder"),
        }
    }

    #[test]
    fn test_insert_placeholder_once_per_name() {
        let registry = StreamRegistry::new();
        let (ticket, state) = inserted(registry.insert_placeholder("cam1", "rtsp://a"));
        assert_eq!(ticket.name(), "cam1");
        assert_eq!(*state.borrow(), StreamState::Starting);

        let second = registry.insert_placeholder("cam1", "rtsp://a");
        assert!(matches!(second, Placeholder::Existing(_)));
        assert_eq!(registry.len(), 1);

        let snapshot = registry.get("cam1").unwrap();
        assert_eq!(snapshot.phase, StreamPhase::Starting);
        assert_eq!(snapshot.pid, None);
        assert_eq!(snapshot.source_url, "rtsp://a");
    }

    #[test]
    fn test_generations_increase() {
        let registry = StreamRegistry::new();
        let (first, _) = inserted(registry.insert_placeholder("cam1", "rtsp://a"));
        registry.remove("cam1").unwrap();
        let (second, _) = inserted(registry.insert_placeholder("cam1", "rtsp://a"));
        assert!(second.generation() > first.generation());
    }

    #[test]
    fn test_fail_publishes_error_and_removes() {
        let registry = StreamRegistry::new();
        let (ticket, _) = inserted(registry.insert_placeholder("cam1", "rtsp://a"));
        let Placeholder::Existing(waiter) = registry.insert_placeholder("cam1", "rtsp://a") else {
            panic!("expected existing entry");
        };

        let error = StartError::SourceUnreachable("refused".into());
        assert!(registry.fail(&ticket, error.clone()).is_some());

        assert!(registry.get("cam1").is_none());
        assert_eq!(*waiter.borrow(), StreamState::Failed(error));
    }

    #[test]
    fn test_stale_ticket_cannot_fail_newer_entry() {
        let registry = StreamRegistry::new();
        let (old, _) = inserted(registry.insert_placeholder("cam1", "rtsp://a"));
        registry.remove("cam1");
        let (_new, state) = inserted(registry.insert_placeholder("cam1", "rtsp://a"));

        assert!(registry.fail(&old, StartError::Output("x".into())).is_none());
        assert!(registry.get("cam1").is_some());
        assert_eq!(*state.borrow(), StreamState::Starting);
    }

    #[test]
    fn test_touch_requires_ready_entry() {
        let registry = StreamRegistry::new();
        assert!(!registry.touch("cam1"));
        let _ = registry.insert_placeholder("cam1", "rtsp://a");
        assert!(!registry.touch("cam1"));
    }

    #[test]
    fn test_starting_entry_is_never_retired() {
        let registry = StreamRegistry::new();
        let (ticket, _) = inserted(registry.insert_placeholder("cam1", "rtsp://a"));
        let created = registry.get("cam1").unwrap().created_at;
        let late = created + Duration::from_secs(600);

        assert!(
            registry
                .retire_if_idle("cam1", ticket.generation(), Duration::from_secs(120), late)
                .is_none()
        );
        assert!(registry.retire("cam1").is_none());
        assert_eq!(registry.get("cam1").unwrap().phase, StreamPhase::Starting);
    }

    #[test]
    fn test_remove_generation_ignores_newer_entry() {
        let registry = StreamRegistry::new();
        let (old, _) = inserted(registry.insert_placeholder("cam1", "rtsp://a"));
        registry.remove("cam1");
        let (new, _) = inserted(registry.insert_placeholder("cam1", "rtsp://a"));

        assert!(registry.remove_generation("cam1", old.generation()).is_none());
        assert!(registry.remove_generation("cam1", new.generation()).is_some());
    }

    #[test]
    fn test_removing_entry_closes_waiters() {
        let registry = StreamRegistry::new();
        let (_ticket, state) = inserted(registry.insert_placeholder("cam1", "rtsp://a"));
        drop(registry.remove("cam1"));
        assert!(state.has_changed().is_err());
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = StreamRegistry::new();
        let _ = registry.insert_placeholder("a", "rtsp://a");
        let _ = registry.insert_placeholder("b", "rtsp://b");
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.snapshot().len(), 0);
    }
}
