//! Availability-probe scheduling.
//!
//! Producers enqueue identifiers at high or low priority; a single worker
//! task services them strictly one at a time, pausing between probes so the
//! remote endpoint never sees bursts. High priority requests come from
//! supervisors that want to resume a recording; low priority ones from the
//! periodic favorites refresh.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SettingsHandle;
use crate::events::{CoreEvent, EventSender};
use crate::probe::AvailabilityProbe;

/// Probe request priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePriority {
    High,
    Low,
}

/// Maximum consecutive high-priority services while low work is pending.
const HIGH_PRIORITY_WINDOW: u32 = 2;

/// The two FIFO queues plus the fairness counter.
///
/// Pure data structure; the scheduler wraps it in a mutex. Invariants: an
/// identifier appears at most once across both queues, and order within a
/// queue is arrival order.
#[derive(Debug, Default)]
pub struct ProbeQueue {
    high: VecDeque<String>,
    low: VecDeque<String>,
    high_streak: u32,
}

impl ProbeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue at the given priority.
    ///
    /// An identifier already queued at high priority is never touched. A
    /// high-priority push evicts a pending low entry for the same
    /// identifier; a low-priority push is a no-op when the identifier is
    /// queued anywhere. Returns whether anything changed.
    pub fn push(&mut self, identifier: &str, priority: ProbePriority) -> bool {
        if self.high.iter().any(|id| id == identifier) {
            return false;
        }

        match priority {
            ProbePriority::High => {
                self.low.retain(|id| id != identifier);
                self.high.push_back(identifier.to_string());
                true
            }
            ProbePriority::Low => {
                if self.low.iter().any(|id| id == identifier) {
                    return false;
                }
                self.low.push_back(identifier.to_string());
                true
            }
        }
    }

    /// Pop the next identifier to probe.
    ///
    /// High priority wins, but after `HIGH_PRIORITY_WINDOW` consecutive high
    /// services a pending low entry is taken first. An empty low queue never
    /// stalls high work.
    pub fn pop_next(&mut self) -> Option<(String, ProbePriority)> {
        if self.high_streak < HIGH_PRIORITY_WINDOW
            && let Some(id) = self.high.pop_front()
        {
            self.high_streak += 1;
            return Some((id, ProbePriority::High));
        }

        self.high_streak = 0;

        if let Some(id) = self.low.pop_front() {
            return Some((id, ProbePriority::Low));
        }
        if let Some(id) = self.high.pop_front() {
            self.high_streak += 1;
            return Some((id, ProbePriority::High));
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }

    #[cfg(test)]
    fn lengths(&self) -> (usize, usize) {
        (self.high.len(), self.low.len())
    }
}

/// Anything that can ask for an identifier to be probed.
///
/// Supervisors hold this instead of the scheduler itself so tests can swap
/// in a recording fake.
pub trait ProbeRequester: Send + Sync + 'static {
    fn request_probe(&self, identifier: &str, priority: ProbePriority);
}

struct SchedulerShared {
    queue: Mutex<ProbeQueue>,
    wake: Notify,
    stop: CancellationToken,
}

/// Cloneable handle for enqueuing probe requests.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<SchedulerShared>,
}

impl ProbeRequester for SchedulerHandle {
    fn request_probe(&self, identifier: &str, priority: ProbePriority) {
        let changed = self.shared.queue.lock().push(identifier, priority);
        if changed {
            debug!(identifier, ?priority, "probe queued");
        }
        // Wake the worker even on no-op pushes; a stored permit is harmless.
        self.shared.wake.notify_one();
    }
}

/// The probe scheduler: queues plus the single worker task.
pub struct AvailabilityScheduler {
    shared: Arc<SchedulerShared>,
    worker: JoinHandle<()>,
}

impl AvailabilityScheduler {
    /// Spawn the worker task. Probe results are delivered over `events`.
    pub fn spawn(
        probe: Arc<dyn AvailabilityProbe>,
        settings: SettingsHandle,
        events: EventSender,
    ) -> Self {
        let shared = Arc::new(SchedulerShared {
            queue: Mutex::new(ProbeQueue::new()),
            wake: Notify::new(),
            stop: CancellationToken::new(),
        });

        let worker = tokio::spawn(Self::worker_loop(
            shared.clone(),
            probe,
            settings,
            events,
        ));

        Self { shared, worker }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Stop the worker without draining pending requests, then await it.
    pub async fn shutdown(self) {
        self.shared.stop.cancel();
        self.shared.wake.notify_one();
        if let Err(e) = self.worker.await {
            debug!(error = %e, "probe worker join failed");
        }
        info!("probe scheduler stopped");
    }

    async fn worker_loop(
        shared: Arc<SchedulerShared>,
        probe: Arc<dyn AvailabilityProbe>,
        settings: SettingsHandle,
        events: EventSender,
    ) {
        loop {
            if shared.stop.is_cancelled() {
                break;
            }

            let next = shared.queue.lock().pop_next();
            let Some((identifier, priority)) = next else {
                tokio::select! {
                    biased;
                    _ = shared.stop.cancelled() => break,
                    _ = shared.wake.notified() => {}
                }
                continue;
            };

            debug!(identifier, ?priority, "probing");
            let status = probe.check(&identifier).await;
            let _ = events.send(CoreEvent::ProbeResult { identifier, status });

            // Read fresh so a settings change applies mid-run.
            let delay = settings.read().http_request_delay_ms;
            tokio::select! {
                biased;
                _ = shared.stop.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
            }
        }
    }
}
