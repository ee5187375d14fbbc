//! The state-owning manager task.
//!
//! Everything stateful lives here: the identifier -> supervisor map, the
//! favorites set and their last-known statuses, and the last snapshot per
//! supervisor. Supervisors and the probe worker deliver results over the
//! event channel; nothing mutates this state from another task.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{SettingsHandle, TrackConfig};
use crate::events::{CoreEvent, EventReceiver};
use crate::probe::AvailabilityStatus;
use crate::recorder::{
    RecordingSupervisor, StatusSnapshot, SupervisorConfig, SupervisorHandle, SupervisorTuning,
};
use crate::scheduler::{ProbePriority, ProbeRequester};
use crate::utils::filename;
use crate::{Error, Result};

/// Receiver of user-visible updates. The binary logs them; a richer frontend
/// would render them.
pub trait StatusSink: Send + Sync + 'static {
    fn status_changed(&self, identifier: &str, snapshot: &StatusSnapshot);
    fn probe_result(&self, identifier: &str, status: AvailabilityStatus);
    /// A favorite that was not publicly available just became so.
    fn favorite_came_online(&self, _identifier: &str) {}
}

/// Sink that reports through tracing.
pub struct LogSink;

impl StatusSink for LogSink {
    fn status_changed(&self, identifier: &str, snapshot: &StatusSnapshot) {
        info!(
            identifier,
            state = ?snapshot.state,
            file_size = snapshot.file_size,
            "status changed"
        );
    }

    fn probe_result(&self, identifier: &str, status: AvailabilityStatus) {
        debug!(identifier, %status, "probe result");
    }

    fn favorite_came_online(&self, identifier: &str) {
        info!(identifier, "favorite is online now");
    }
}

/// Snapshot of the manager's state, used for display and persistence.
#[derive(Debug, Default)]
pub struct ManagerReport {
    pub records: Vec<TrackConfig>,
    pub favorites: BTreeMap<String, AvailabilityStatus>,
    pub statuses: BTreeMap<String, StatusSnapshot>,
}

enum ManagerCommand {
    Track(TrackConfig),
    Start { identifier: String, as_waiting: bool },
    StartAll,
    Stop { identifier: String },
    Remove { identifier: String },
    AddFavorite(String),
    RemoveFavorite(String),
    RefreshFavorites,
    Report { reply: oneshot::Sender<ManagerReport> },
    Shutdown,
}

/// Handle for driving the manager task.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl ManagerHandle {
    fn send(&self, command: ManagerCommand) {
        let _ = self.tx.send(command);
    }

    pub fn track(&self, config: TrackConfig) {
        self.send(ManagerCommand::Track(config));
    }

    pub fn start(&self, identifier: impl Into<String>, as_waiting: bool) {
        self.send(ManagerCommand::Start {
            identifier: identifier.into(),
            as_waiting,
        });
    }

    /// Start every tracked identifier in the waiting state, the record-on-
    /// start behavior.
    pub fn start_all(&self) {
        self.send(ManagerCommand::StartAll);
    }

    pub fn stop(&self, identifier: impl Into<String>) {
        self.send(ManagerCommand::Stop {
            identifier: identifier.into(),
        });
    }

    pub fn remove(&self, identifier: impl Into<String>) {
        self.send(ManagerCommand::Remove {
            identifier: identifier.into(),
        });
    }

    pub fn add_favorite(&self, identifier: impl Into<String>) {
        self.send(ManagerCommand::AddFavorite(identifier.into()));
    }

    pub fn remove_favorite(&self, identifier: impl Into<String>) {
        self.send(ManagerCommand::RemoveFavorite(identifier.into()));
    }

    pub fn refresh_favorites(&self) {
        self.send(ManagerCommand::RefreshFavorites);
    }

    pub async fn report(&self) -> Result<ManagerReport> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Report { reply });
        rx.await.map_err(|_| Error::ChannelClosed("manager"))
    }
}

struct TrackedEntry {
    config: TrackConfig,
    handle: SupervisorHandle,
    last: Option<StatusSnapshot>,
}

/// The manager task.
pub struct StreamManager {
    settings: SettingsHandle,
    requester: Arc<dyn ProbeRequester>,
    sink: Arc<dyn StatusSink>,
    events_tx: crate::events::EventSender,
    events: EventReceiver,
    rx: mpsc::UnboundedReceiver<ManagerCommand>,
    tuning: SupervisorTuning,
    tracked: BTreeMap<String, TrackedEntry>,
    favorites: BTreeMap<String, AvailabilityStatus>,
}

impl StreamManager {
    /// Spawn the manager task.
    ///
    /// `events_tx` is the sender side of `events`; the manager keeps it to
    /// wire into supervisors it creates.
    pub fn spawn(
        settings: SettingsHandle,
        requester: Arc<dyn ProbeRequester>,
        sink: Arc<dyn StatusSink>,
        events_tx: crate::events::EventSender,
        events: EventReceiver,
        tuning: SupervisorTuning,
    ) -> (ManagerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let manager = Self {
            settings,
            requester,
            sink,
            events_tx,
            events,
            rx,
            tuning,
            tracked: BTreeMap::new(),
            favorites: BTreeMap::new(),
        };

        let join = tokio::spawn(manager.run());
        (ManagerHandle { tx }, join)
    }

    /// Shut the manager down and wait for it to finish.
    pub async fn shutdown(handle: &ManagerHandle, join: JoinHandle<()>) {
        handle.send(ManagerCommand::Shutdown);
        if let Err(e) = join.await {
            warn!(error = %e, "manager task join failed");
        }
    }

    async fn run(mut self) {
        let mut refresh_secs = self.favorites_refresh_secs();
        let mut favorites_tick = new_refresh_interval(refresh_secs);

        loop {
            // Pick up live changes to the refresh interval.
            let current = self.favorites_refresh_secs();
            if current != refresh_secs {
                refresh_secs = current;
                favorites_tick = new_refresh_interval(refresh_secs);
            }

            tokio::select! {
                biased;
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(ManagerCommand::Shutdown) | None => {
                            self.shutdown_all().await;
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
                event = self.events.recv() => {
                    if let Some(event) = event {
                        self.handle_event(event);
                    }
                }
                _ = favorites_tick.tick() => {
                    self.refresh_favorites();
                }
            }
        }

        info!("manager stopped");
    }

    async fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Track(config) => self.track(config),
            ManagerCommand::Start {
                identifier,
                as_waiting,
            } => match self.tracked.get(&identifier) {
                Some(entry) => entry.handle.start(as_waiting),
                None => warn!(identifier, "start for untracked identifier"),
            },
            ManagerCommand::StartAll => {
                for entry in self.tracked.values() {
                    entry.handle.start(true);
                }
            }
            ManagerCommand::Stop { identifier } => {
                if let Some(entry) = self.tracked.get(&identifier) {
                    entry.handle.stop();
                }
            }
            ManagerCommand::Remove { identifier } => {
                match self.tracked.remove(&identifier) {
                    Some(entry) => {
                        entry.handle.stop();
                        entry.handle.shutdown().await;
                        info!(identifier, "tracking removed");
                    }
                    None => debug!(identifier, "remove for untracked identifier"),
                }
            }
            ManagerCommand::AddFavorite(identifier) => {
                self.favorites
                    .entry(identifier.clone())
                    .or_insert(AvailabilityStatus::Unknown);
                self.requester
                    .request_probe(&identifier, ProbePriority::Low);
            }
            ManagerCommand::RemoveFavorite(identifier) => {
                self.favorites.remove(&identifier);
            }
            ManagerCommand::RefreshFavorites => self.refresh_favorites(),
            ManagerCommand::Report { reply } => {
                let _ = reply.send(self.report());
            }
            ManagerCommand::Shutdown => unreachable!("handled in run"),
        }
    }

    fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::StatusChanged {
                identifier,
                snapshot,
            } => {
                self.sink.status_changed(&identifier, &snapshot);
                if let Some(entry) = self.tracked.get_mut(&identifier) {
                    entry.last = Some(snapshot);
                }
            }
            CoreEvent::ProbeResult { identifier, status } => {
                self.sink.probe_result(&identifier, status);

                if let Some(previous) = self.favorites.get_mut(&identifier) {
                    if *previous != AvailabilityStatus::Public && status.is_recordable() {
                        self.sink.favorite_came_online(&identifier);
                    }
                    *previous = status;
                }

                match self.tracked.get(&identifier) {
                    Some(entry) if status.is_recordable() => entry.handle.resume_on_available(),
                    Some(_) => {}
                    // Late results for removed identifiers are expected.
                    None if !self.favorites.contains_key(&identifier) => {
                        debug!(identifier, "probe result for unknown identifier");
                    }
                    None => {}
                }
            }
        }
    }

    fn track(&mut self, config: TrackConfig) {
        if self.tracked.contains_key(&config.identifier) {
            debug!(identifier = %config.identifier, "already tracked");
            return;
        }

        let output_template = match &config.file_name_template {
            Some(template) => template.clone(),
            None => {
                let settings = self.settings.read();
                filename::build_output_template(
                    &crate::probe::http::identifier_from_url(&config.identifier),
                    settings.default_records_path.as_deref(),
                    &config.quality,
                )
            }
        };

        let handle = RecordingSupervisor::spawn(
            SupervisorConfig {
                identifier: config.identifier.clone(),
                quality: config.quality.clone(),
                wait_for_available: config.wait_for_available,
                output_template,
            },
            self.settings.clone(),
            self.requester.clone(),
            self.events_tx.clone(),
            self.tuning.clone(),
        );

        info!(identifier = %config.identifier, quality = %config.quality, "tracking");
        self.tracked.insert(
            config.identifier.clone(),
            TrackedEntry {
                config,
                handle,
                last: None,
            },
        );
    }

    fn refresh_favorites(&self) {
        for identifier in self.favorites.keys() {
            self.requester.request_probe(identifier, ProbePriority::Low);
        }
    }

    fn report(&self) -> ManagerReport {
        ManagerReport {
            records: self
                .tracked
                .values()
                .map(|entry| entry.config.clone())
                .collect(),
            favorites: self.favorites.clone(),
            statuses: self
                .tracked
                .iter()
                .filter_map(|(id, entry)| entry.last.clone().map(|s| (id.clone(), s)))
                .collect(),
        }
    }

    async fn shutdown_all(&mut self) {
        let tracked = std::mem::take(&mut self.tracked);
        for (identifier, entry) in tracked {
            debug!(identifier, "shutting down supervisor");
            entry.handle.shutdown().await;
        }
    }

    fn favorites_refresh_secs(&self) -> u64 {
        self.settings.read().favorites_update_interval_secs.max(1)
    }
}

fn new_refresh_interval(secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; favorites refresh on a delay.
    interval.reset();
    interval
}
