//! Per-identifier recording supervision.
//!
//! Each tracked identifier gets one [`RecordingSupervisor`] task owning the
//! recorder process and the two timers around it: the availability retry
//! timer (armed while waiting for the stream to come back) and the file-size
//! tick (armed while recording). Commands arrive over a mailbox; every state
//! change goes out as a [`CoreEvent::StatusChanged`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SettingsHandle;
use crate::events::{CoreEvent, EventSender};
use crate::scheduler::{ProbePriority, ProbeRequester};
use crate::utils::{filename, fs};

use super::classify::{ExitDisposition, classify_exit};
use super::process::{RecorderProcess, build_recorder_args};

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Recorder process is running.
    InProgress,
    /// No process; waiting for an availability probe to report the stream up.
    Waiting,
    /// Recorder exited and nothing more will happen without a command.
    Finished,
    /// Explicitly stopped.
    Stopped,
    /// The recorder could not be started or the quality is missing.
    StartProcessError,
}

/// Point-in-time view of a supervisor.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub state: TaskState,
    pub file_name: Option<PathBuf>,
    pub file_size: Option<u64>,
    pub started_at: Option<DateTime<Local>>,
    pub ended_at: Option<DateTime<Local>>,
    pub log: String,
}

/// Commands accepted by a supervisor.
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Begin recording, or begin waiting when `as_waiting` is set.
    Start { as_waiting: bool },
    /// Stop recording; always lands in [`TaskState::Stopped`].
    Stop,
    /// A probe reported the stream available.
    ResumeOnAvailable,
    /// Tear down without a state transition. The mailbox closes after this.
    Shutdown,
}

/// Static per-supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Identifier handed to the recorder and the probe scheduler.
    pub identifier: String,
    pub quality: String,
    /// Probe for availability and resume after the stream drops.
    pub wait_for_available: bool,
    /// Output template; `%DATE%` expands per spawn.
    pub output_template: PathBuf,
}

/// Timer intervals, injectable so tests run in milliseconds.
#[derive(Debug, Clone)]
pub struct SupervisorTuning {
    /// File-size refresh interval while recording.
    pub status_tick: Duration,
    /// Overrides the configured waiting interval when set.
    pub retry_override: Option<Duration>,
}

impl Default for SupervisorTuning {
    fn default() -> Self {
        Self {
            status_tick: Duration::from_secs(3),
            retry_override: None,
        }
    }
}

/// Cloneable-enough handle to a running supervisor task.
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<SupervisorCommand>,
    join: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn start(&self, as_waiting: bool) {
        let _ = self.tx.send(SupervisorCommand::Start { as_waiting });
    }

    pub fn stop(&self) {
        let _ = self.tx.send(SupervisorCommand::Stop);
    }

    pub fn resume_on_available(&self) {
        let _ = self.tx.send(SupervisorCommand::ResumeOnAvailable);
    }

    /// Tear the supervisor down and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.tx.send(SupervisorCommand::Shutdown);
        if let Err(e) = self.join.await {
            warn!(error = %e, "supervisor task join failed");
        }
    }
}

#[derive(Debug)]
struct Status {
    state: TaskState,
    file_name: Option<PathBuf>,
    file_size: Option<u64>,
    started_at: Option<DateTime<Local>>,
    ended_at: Option<DateTime<Local>>,
    log: String,
}

impl Status {
    fn new() -> Self {
        Self {
            state: TaskState::Stopped,
            file_name: None,
            file_size: None,
            started_at: None,
            ended_at: None,
            log: String::new(),
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            started_at: self.started_at,
            ended_at: self.ended_at,
            log: self.log.clone(),
        }
    }
}

enum Wakeup {
    Command(Option<SupervisorCommand>),
    Exited(Option<i32>),
    Line(Option<String>),
    Retry,
    Tick,
}

/// The supervisor actor. Owns the recorder process and its timers.
pub struct RecordingSupervisor {
    config: SupervisorConfig,
    settings: SettingsHandle,
    requester: Arc<dyn ProbeRequester>,
    events: EventSender,
    tuning: SupervisorTuning,
    rx: mpsc::UnboundedReceiver<SupervisorCommand>,
    status: Status,
    process: Option<RecorderProcess>,
    /// Mirrors the availability retry timer being armed.
    retry_armed: bool,
}

impl RecordingSupervisor {
    /// Spawn the supervisor task in [`TaskState::Stopped`].
    pub fn spawn(
        config: SupervisorConfig,
        settings: SettingsHandle,
        requester: Arc<dyn ProbeRequester>,
        events: EventSender,
        tuning: SupervisorTuning,
    ) -> SupervisorHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            config,
            settings,
            requester,
            events,
            tuning,
            rx,
            status: Status::new(),
            process: None,
            retry_armed: false,
        };

        let join = tokio::spawn(supervisor.run());
        SupervisorHandle { tx, join }
    }

    async fn run(mut self) {
        debug!(identifier = %self.config.identifier, "supervisor started");

        loop {
            let retry_armed = self.retry_armed;
            let retry_interval = self.retry_interval();
            let tick_armed = self.process.is_some();
            let tick_interval = self.tuning.status_tick;

            let wakeup = {
                let (lines, exit) = match self.process.as_mut() {
                    Some(p) => (p.lines.as_mut(), Some(&mut p.exit)),
                    None => (None, None),
                };

                tokio::select! {
                    biased;
                    cmd = self.rx.recv() => Wakeup::Command(cmd),
                    code = recv_exit(exit) => Wakeup::Exited(code),
                    line = recv_line(lines) => Wakeup::Line(line),
                    _ = armed_timer(retry_armed, retry_interval) => Wakeup::Retry,
                    _ = armed_timer(tick_armed, tick_interval) => Wakeup::Tick,
                }
            };

            match wakeup {
                Wakeup::Command(Some(SupervisorCommand::Start { as_waiting })) => {
                    if self.process.is_none() {
                        self.start_process(as_waiting).await;
                    }
                }
                Wakeup::Command(Some(SupervisorCommand::Stop)) => {
                    self.stop().await;
                }
                Wakeup::Command(Some(SupervisorCommand::ResumeOnAvailable)) => {
                    self.resume_on_available().await;
                }
                Wakeup::Command(Some(SupervisorCommand::Shutdown)) | Wakeup::Command(None) => {
                    self.teardown().await;
                    break;
                }
                Wakeup::Exited(code) => {
                    self.on_process_exited(code).await;
                }
                Wakeup::Line(Some(line)) => {
                    self.status.log.push_str(&line);
                    self.status.log.push('\n');
                }
                Wakeup::Line(None) => {
                    // Output pumps finished; disable this arm.
                    if let Some(p) = self.process.as_mut() {
                        p.lines = None;
                    }
                }
                Wakeup::Retry => {
                    self.requester
                        .request_probe(&self.config.identifier, ProbePriority::High);
                }
                Wakeup::Tick => {
                    self.status.file_size = self.read_file_size();
                    self.emit_status();
                }
            }
        }

        debug!(identifier = %self.config.identifier, "supervisor finished");
    }

    async fn start_process(&mut self, as_waiting: bool) {
        let (recorder_path, recorder_options) = {
            let settings = self.settings.read();
            (
                settings.recorder_path.clone(),
                settings.recorder_options.clone(),
            )
        };

        let now = Local::now();
        let output = filename::resolve_output_path(&self.config.output_template, now);

        self.status.state = TaskState::InProgress;
        self.status.file_name = Some(output.clone());
        self.status.file_size = None;
        self.status.started_at = Some(now);
        self.status.ended_at = Some(now);
        self.status.log = format!("Started: {}\n", filename::timestamp(now));

        if as_waiting {
            self.status.state = TaskState::Waiting;
            self.retry_armed = self.config.wait_for_available;
            self.requester
                .request_probe(&self.config.identifier, ProbePriority::High);
        } else {
            let args = build_recorder_args(
                &recorder_options,
                &output,
                &self.config.identifier,
                &self.config.quality,
            );

            let spawned = match fs::ensure_parent_dir(&output).await {
                Ok(()) => RecorderProcess::spawn(&recorder_path, &args),
                Err(e) => Err(e),
            };

            match spawned {
                Ok(process) => {
                    info!(
                        identifier = %self.config.identifier,
                        pid = process.pid(),
                        output = %output.display(),
                        "recording started"
                    );
                    self.process = Some(process);
                    self.retry_armed = false;
                }
                Err(e) => {
                    warn!(identifier = %self.config.identifier, error = %e, "recorder start failed");
                    self.status.state = TaskState::StartProcessError;
                    self.status
                        .log
                        .push_str(&format!("{}\n{}\n", filename::timestamp(Local::now()), e));
                    self.retry_armed = self.config.wait_for_available;
                }
            }
        }

        self.emit_status();
    }

    async fn stop(&mut self) {
        self.retry_armed = false;

        let now = Local::now();
        self.status.ended_at = Some(now);
        self.status
            .log
            .push_str(&format!("Stopped {}\n", filename::timestamp(now)));

        if let Some(process) = self.process.take() {
            info!(identifier = %self.config.identifier, pid = process.pid(), "stopping recorder");
            process.terminate().await;
        }

        self.status.state = TaskState::Stopped;
        self.emit_status();
    }

    /// Silent teardown on shutdown or mailbox close. No transition is
    /// reported; the supervisor is going away.
    async fn teardown(&mut self) {
        self.retry_armed = false;
        if let Some(process) = self.process.take() {
            process.terminate().await;
        }
    }

    async fn resume_on_available(&mut self) {
        let resumable = self.status.state == TaskState::Waiting
            || (self.status.state == TaskState::StartProcessError && self.config.wait_for_available);

        if resumable && self.process.is_none() {
            self.start_process(false).await;
        }
    }

    async fn on_process_exited(&mut self, code: Option<i32>) {
        let Some(mut process) = self.process.take() else {
            return;
        };

        // The exit can win the race against buffered output; the markers the
        // classifier greps for may still be in flight. The pumps drop their
        // sender at EOF, so this drain always terminates.
        if let Some(mut lines) = process.lines.take() {
            while let Some(line) = lines.recv().await {
                self.status.log.push_str(&line);
                self.status.log.push('\n');
            }
        }

        let now = Local::now();
        self.status.ended_at = Some(now);
        self.status
            .log
            .push_str(&format!("Exited {}\n", filename::timestamp(now)));

        debug!(identifier = %self.config.identifier, ?code, "recorder exited");

        match classify_exit(
            &self.status.log,
            &self.config.quality,
            self.config.wait_for_available,
            self.status.file_size,
        ) {
            ExitDisposition::Relaunch => {
                info!(identifier = %self.config.identifier, "limit reached, continuing in a new file");
                self.start_process(false).await;
            }
            ExitDisposition::QualityUnavailable => {
                self.status.state = TaskState::StartProcessError;
                self.retry_armed = self.config.wait_for_available;
                self.emit_status();
            }
            ExitDisposition::WaitForAvailability => {
                self.status.state = TaskState::Waiting;
                self.retry_armed = true;
                self.emit_status();
            }
            ExitDisposition::Finished => {
                self.status.state = TaskState::Finished;
                self.retry_armed = false;
                self.emit_status();
            }
        }
    }

    fn read_file_size(&self) -> Option<u64> {
        let path = self.status.file_name.as_ref()?;
        std::fs::metadata(path).ok().map(|m| m.len())
    }

    fn retry_interval(&self) -> Duration {
        self.tuning.retry_override.unwrap_or_else(|| {
            Duration::from_secs(self.settings.read().waiting_task_interval_secs)
        })
    }

    fn emit_status(&self) {
        let _ = self.events.send(CoreEvent::StatusChanged {
            identifier: self.config.identifier.clone(),
            snapshot: self.status.snapshot(),
        });
    }
}

async fn armed_timer(armed: bool, interval: Duration) {
    if armed {
        tokio::time::sleep(interval).await
    } else {
        std::future::pending().await
    }
}

async fn recv_line(lines: Option<&mut mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match lines {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_exit(
    exit: Option<&mut tokio::sync::oneshot::Receiver<Option<i32>>>,
) -> Option<i32> {
    match exit {
        Some(rx) => rx.await.unwrap_or(None),
        None => std::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{Settings, settings_handle};
    use crate::events::{self, EventReceiver};
    use parking_lot::Mutex;
    use std::path::Path;

    struct RecordingRequester(Mutex<Vec<(String, ProbePriority)>>);

    impl RecordingRequester {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }

        fn requests(&self) -> Vec<(String, ProbePriority)> {
            self.0.lock().clone()
        }
    }

    impl ProbeRequester for RecordingRequester {
        fn request_probe(&self, identifier: &str, priority: ProbePriority) {
            self.0.lock().push((identifier.to_string(), priority));
        }
    }

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("recorder.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn test_settings(recorder: &Path) -> SettingsHandle {
        settings_handle(Settings {
            recorder_path: recorder.to_path_buf(),
            recorder_options: String::new(),
            waiting_task_interval_secs: 1,
            ..Settings::default()
        })
    }

    fn test_config(dir: &Path, wait_for_available: bool) -> SupervisorConfig {
        SupervisorConfig {
            identifier: "alpha".to_string(),
            quality: "best".to_string(),
            wait_for_available,
            output_template: dir.join("alpha [%DATE%][best].ts"),
        }
    }

    fn fast_tuning() -> SupervisorTuning {
        SupervisorTuning {
            status_tick: Duration::from_millis(25),
            retry_override: Some(Duration::from_millis(30)),
        }
    }

    async fn next_snapshot(rx: &mut EventReceiver) -> StatusSnapshot {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for status event")
                .expect("event channel closed");
            if let CoreEvent::StatusChanged { snapshot, .. } = event {
                return snapshot;
            }
        }
    }

    async fn next_state(rx: &mut EventReceiver, state: TaskState) -> StatusSnapshot {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for state {:?}",
                state
            );
            let snapshot = next_snapshot(rx).await;
            if snapshot.state == state {
                return snapshot;
            }
        }
    }

    #[tokio::test]
    async fn test_start_as_waiting_requests_high_priority_probe() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 300");
        let requester = RecordingRequester::new();
        let (tx, mut rx) = events::channel();

        let handle = RecordingSupervisor::spawn(
            test_config(dir.path(), true),
            test_settings(&script),
            requester.clone(),
            tx,
            fast_tuning(),
        );

        handle.start(true);
        let snapshot = next_state(&mut rx, TaskState::Waiting).await;
        assert!(snapshot.log.starts_with("Started:"));
        assert_eq!(
            requester.requests()[0],
            ("alpha".to_string(), ProbePriority::High)
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_waiting_retry_keeps_requesting_probes() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 300");
        let requester = RecordingRequester::new();
        let (tx, mut rx) = events::channel();

        let handle = RecordingSupervisor::spawn(
            test_config(dir.path(), true),
            test_settings(&script),
            requester.clone(),
            tx,
            fast_tuning(),
        );

        handle.start(true);
        next_state(&mut rx, TaskState::Waiting).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Initial request plus several retry-timer requests.
        assert!(requester.requests().len() >= 3);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_failure_sets_start_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let requester = RecordingRequester::new();
        let (tx, mut rx) = events::channel();

        let handle = RecordingSupervisor::spawn(
            test_config(dir.path(), false),
            test_settings(Path::new("/nonexistent/recorder-binary")),
            requester.clone(),
            tx,
            fast_tuning(),
        );

        handle.start(false);
        let snapshot = next_state(&mut rx, TaskState::StartProcessError).await;
        assert!(snapshot.log.contains("failed to start"));

        // Probing disabled, so the retry timer stays off.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(requester.requests().is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_lands_in_stopped_with_no_followup() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 300");
        let requester = RecordingRequester::new();
        let (tx, mut rx) = events::channel();

        let handle = RecordingSupervisor::spawn(
            test_config(dir.path(), true),
            test_settings(&script),
            requester.clone(),
            tx,
            fast_tuning(),
        );

        handle.start(false);
        next_state(&mut rx, TaskState::InProgress).await;

        handle.stop();
        let snapshot = next_state(&mut rx, TaskState::Stopped).await;
        assert!(snapshot.log.contains("Stopped"));

        // Killing the process must not re-enter exit classification.
        tokio::time::sleep(Duration::from_millis(200)).await;
        while let Ok(event) = rx.try_recv() {
            if let CoreEvent::StatusChanged { snapshot, .. } = event {
                assert_eq!(snapshot.state, TaskState::Stopped);
            }
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_playable_stream_with_probing_waits() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'error: No playable streams found'");
        let requester = RecordingRequester::new();
        let (tx, mut rx) = events::channel();

        let handle = RecordingSupervisor::spawn(
            test_config(dir.path(), true),
            test_settings(&script),
            requester.clone(),
            tx,
            fast_tuning(),
        );

        handle.start(false);
        let snapshot = next_state(&mut rx, TaskState::Waiting).await;
        assert!(snapshot.log.contains("Exited"));
        assert!(snapshot.log.contains("No playable streams found"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_clean_exit_without_probing_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'stream ended'");
        let requester = RecordingRequester::new();
        let (tx, mut rx) = events::channel();

        let handle = RecordingSupervisor::spawn(
            test_config(dir.path(), false),
            test_settings(&script),
            requester.clone(),
            tx,
            fast_tuning(),
        );

        handle.start(false);
        next_state(&mut rx, TaskState::Finished).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_quality_sets_start_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "echo \"error: The specified stream(s) 'best' could not be found.\"",
        );
        let requester = RecordingRequester::new();
        let (tx, mut rx) = events::channel();

        let handle = RecordingSupervisor::spawn(
            test_config(dir.path(), false),
            test_settings(&script),
            requester.clone(),
            tx,
            fast_tuning(),
        );

        handle.start(false);
        next_state(&mut rx, TaskState::StartProcessError).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_early_stop_with_data_relaunches_into_new_file() {
        let dir = tempfile::tempdir().unwrap();
        // $2 is the output path from the "-o <path>" pair.
        let script = write_script(
            dir.path(),
            "head -c 4096 /dev/zero > \"$2\"\nsleep 0.4\necho '[cli][info] Stopping stream early after 3600 seconds'",
        );
        let requester = RecordingRequester::new();
        let (tx, mut rx) = events::channel();

        let handle = RecordingSupervisor::spawn(
            test_config(dir.path(), true),
            test_settings(&script),
            requester.clone(),
            tx,
            fast_tuning(),
        );

        handle.start(false);
        let first = next_state(&mut rx, TaskState::InProgress).await;
        let first_file = first.file_name.clone().unwrap();

        // The relaunch opens a fresh file in a fresh log.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for relaunch"
            );
            let snapshot = next_snapshot(&mut rx).await;
            if snapshot.state == TaskState::InProgress
                && snapshot.file_name.as_ref() != Some(&first_file)
            {
                break;
            }
        }

        handle.stop();
        next_state(&mut rx, TaskState::Stopped).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_resume_only_acts_in_waiting_or_retryable_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 300");
        let requester = RecordingRequester::new();
        let (tx, mut rx) = events::channel();

        let handle = RecordingSupervisor::spawn(
            test_config(dir.path(), true),
            test_settings(&script),
            requester.clone(),
            tx,
            fast_tuning(),
        );

        // Stopped is not resumable.
        handle.resume_on_available();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        handle.start(true);
        next_state(&mut rx, TaskState::Waiting).await;

        handle.resume_on_available();
        next_state(&mut rx, TaskState::InProgress).await;

        handle.stop();
        next_state(&mut rx, TaskState::Stopped).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_while_running_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 300");
        let requester = RecordingRequester::new();
        let (tx, mut rx) = events::channel();

        let handle = RecordingSupervisor::spawn(
            test_config(dir.path(), false),
            test_settings(&script),
            requester.clone(),
            tx,
            fast_tuning(),
        );

        handle.start(false);
        next_state(&mut rx, TaskState::InProgress).await;

        handle.start(false);
        handle.stop();
        let snapshot = next_state(&mut rx, TaskState::Stopped).await;
        // A second start would have reset the log with a new "Started:" line.
        assert_eq!(snapshot.log.matches("Started:").count(), 1);

        handle.shutdown().await;
    }
}
