use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sessionguard_core::{IdentityId, SessionId};

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "session.rotated").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred.
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// Why a session stopped existing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Logout,
    Revoked,
}

/// Session lifecycle facts emitted by the token-pair protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A login created a new session.
    Opened {
        session_id: SessionId,
        identity_id: IdentityId,
        occurred_at: DateTime<Utc>,
    },

    /// The refresh credential of a session was replaced.
    Rotated {
        session_id: SessionId,
        identity_id: IdentityId,
        occurred_at: DateTime<Utc>,
    },

    /// A rotation attempt observed a concurrent winner and failed closed.
    RotationRaceLost {
        session_id: SessionId,
        identity_id: IdentityId,
        occurred_at: DateTime<Utc>,
    },

    /// An access credential of one identity was presented with a refresh
    /// credential of another. Potential credential theft.
    PairMismatch {
        session_id: SessionId,
        session_identity: IdentityId,
        presented_identity: IdentityId,
        occurred_at: DateTime<Utc>,
    },

    /// The session was deleted.
    Closed {
        session_id: SessionId,
        identity_id: IdentityId,
        reason: CloseReason,
        occurred_at: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::Opened { session_id, .. }
            | SessionEvent::Rotated { session_id, .. }
            | SessionEvent::RotationRaceLost { session_id, .. }
            | SessionEvent::PairMismatch { session_id, .. }
            | SessionEvent::Closed { session_id, .. } => *session_id,
        }
    }

    /// Events that warrant attention from whoever watches the audit trail.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            SessionEvent::PairMismatch { .. } | SessionEvent::RotationRaceLost { .. }
        )
    }
}

impl Event for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Opened { .. } => "session.opened",
            SessionEvent::Rotated { .. } => "session.rotated",
            SessionEvent::RotationRaceLost { .. } => "session.rotation_race_lost",
            SessionEvent::PairMismatch { .. } => "session.pair_mismatch",
            SessionEvent::Closed { .. } => "session.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::Opened { occurred_at, .. }
            | SessionEvent::Rotated { occurred_at, .. }
            | SessionEvent::RotationRaceLost { occurred_at, .. }
            | SessionEvent::PairMismatch { occurred_at, .. }
            | SessionEvent::Closed { occurred_at, .. } => *occurred_at,
        }
    }
}
