//! Recorder exit classification.
//!
//! The recorder does not report why it exited, so the supervisor greps the
//! accumulated output for known messages. The marker strings are verbatim
//! recorder output and must not be reworded.

/// Printed when a time or size limit cut the recording short.
const EARLY_STOP_MARKER: &str = "Stopping stream early after";

/// Printed when the stream has nothing playable at all.
const NO_PLAYABLE_MARKER: &str = "No playable streams found";

/// Minimum bytes on disk before an early-stopped recording is worth
/// continuing in a new file. Guards against relaunch loops on streams that
/// die immediately.
pub const MIN_RELAUNCH_BYTES: u64 = 1000;

/// The recorder stopped early on a limit, so the stream itself is still up.
pub fn recordable_stream_found(log: &str) -> bool {
    log.contains(EARLY_STOP_MARKER)
}

/// A playable stream was present at some quality.
pub fn playable_stream_found(log: &str) -> bool {
    !log.contains(NO_PLAYABLE_MARKER)
}

/// The configured quality was available.
pub fn quality_supported(log: &str, quality: &str) -> bool {
    !log.contains(&format!(
        "The specified stream(s) '{}' could not be found.",
        quality
    ))
}

/// What the supervisor should do after the recorder exits on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Limit hit mid-stream with real data on disk; start a new file now.
    Relaunch,
    /// Stream is up but not at the configured quality.
    QualityUnavailable,
    /// Stream is down; wait for a probe to report it available again.
    WaitForAvailability,
    /// Nothing more to do.
    Finished,
}

/// Classify a self-exit. Rules are ordered; the first match wins.
pub fn classify_exit(
    log: &str,
    quality: &str,
    wait_for_available: bool,
    file_size: Option<u64>,
) -> ExitDisposition {
    if recordable_stream_found(log) && file_size.is_some_and(|size| size > MIN_RELAUNCH_BYTES) {
        return ExitDisposition::Relaunch;
    }
    if playable_stream_found(log) && !quality_supported(log, quality) {
        return ExitDisposition::QualityUnavailable;
    }
    if wait_for_available {
        return ExitDisposition::WaitForAvailability;
    }
    ExitDisposition::Finished
}
