//! Availability probing.
//!
//! The scheduler asks an [`AvailabilityProbe`] what state an identifier is
//! in; everything downstream (supervisor resume, favorites display) keys off
//! the returned [`AvailabilityStatus`]. Probe failures fold into the status
//! instead of erroring so a flaky endpoint never wedges the probe worker.

use async_trait::async_trait;

pub mod http;

/// Result of an availability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityStatus {
    /// No probe has completed yet, or the response was unrecognized.
    Unknown,
    Offline,
    /// Publicly available; recording is possible.
    Public,
    Private,
    Hidden,
    Away,
    /// Transport, protocol, or parse failure.
    Error,
    /// The endpoint rate-limited us.
    Error429,
}

impl AvailabilityStatus {
    /// Whether a recorder pointed at this identifier could produce output.
    pub fn is_recordable(self) -> bool {
        matches!(self, AvailabilityStatus::Public)
    }
}

impl std::fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AvailabilityStatus::Unknown => "unknown",
            AvailabilityStatus::Offline => "offline",
            AvailabilityStatus::Public => "public",
            AvailabilityStatus::Private => "private",
            AvailabilityStatus::Hidden => "hidden",
            AvailabilityStatus::Away => "away",
            AvailabilityStatus::Error => "error",
            AvailabilityStatus::Error429 => "rate-limited",
        };
        write!(f, "{}", s)
    }
}

/// Trait for checking the availability of a single identifier.
///
/// Implementations must be infallible at the type level: anything that goes
/// wrong maps to [`AvailabilityStatus::Error`] (or `Error429`).
#[async_trait]
pub trait AvailabilityProbe: Send + Sync + 'static {
    async fn check(&self, identifier: &str) -> AvailabilityStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_public_is_recordable() {
        assert!(AvailabilityStatus::Public.is_recordable());
        for status in [
            AvailabilityStatus::Unknown,
            AvailabilityStatus::Offline,
            AvailabilityStatus::Private,
            AvailabilityStatus::Hidden,
            AvailabilityStatus::Away,
            AvailabilityStatus::Error,
            AvailabilityStatus::Error429,
        ] {
            assert!(!status.is_recordable(), "{status} must not be recordable");
        }
    }
}
