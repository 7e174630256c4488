// ── Recency rule ──
//
// Decides whether an incoming update for one entity replaces what was
// last applied. Pure: both stamps carry their own receive instant.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Where an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateSource {
    /// Live stream.
    Push,
    /// Snapshot fetch.
    Poll,
}

/// What the reconciler remembers about the last update it applied to an
/// entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub timestamp: Option<DateTime<Utc>>,
    pub source: UpdateSource,
    pub state: String,
    pub received_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Accept,
    /// Same state and timestamp as the last applied update.
    Duplicate,
    /// Older, or outranked by a recent push.
    Stale,
}

/// Strictly newer timestamps win, strictly older ones lose. When either
/// side lacks a timestamp or both are equal, a push applied less than
/// `push_window` ago outranks a poll; everything else is accepted.
pub(crate) fn judge(prev: Option<&Stamp>, next: &Stamp, push_window: Duration) -> Verdict {
    let Some(prev) = prev else {
        return Verdict::Accept;
    };

    if prev.state == next.state && prev.timestamp == next.timestamp {
        return Verdict::Duplicate;
    }

    if let (Some(p), Some(n)) = (prev.timestamp, next.timestamp) {
        if n > p {
            return Verdict::Accept;
        }
        if n < p {
            return Verdict::Stale;
        }
    }

    let push_is_fresh = next.received_at.saturating_duration_since(prev.received_at) < push_window;
    if prev.source == UpdateSource::Push && next.source == UpdateSource::Poll && push_is_fresh {
        Verdict::Stale
    } else {
        Verdict::Accept
    }
}
