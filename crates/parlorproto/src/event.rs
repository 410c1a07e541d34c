use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::session::{DuelKind, GameKind, Phase, SessionId};
use crate::ProtoError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub handle: String,
    pub name: String,
}

impl PlayerRef {
    pub fn new(handle: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredPlayer {
    pub handle: String,
    pub name: String,
    pub score: u64,
}

/// One dealt hand inside a `round_content` event. The byte layout of
/// `hand` depends on the session's [`GameKind`], see `GameKind::hand_len`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEntry {
    pub handle: String,
    pub hand: Vec<u8>,
}

/// Everything a parlor client ever publishes or consumes.
///
/// All events are idempotent on receipt: scores are cumulative totals,
/// joins upsert, round content is cached by `(session, round)`, and phase
/// changes only ever move the lifecycle forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    SessionStart {
        session: SessionId,
        kind: GameKind,
        rounds: u32,
        join_window_s: u64,
    },
    SessionJoin {
        session: SessionId,
        player: PlayerRef,
    },
    SessionPhase {
        session: SessionId,
        phase: Phase,
    },
    /// Cumulative total for one player, published by that player's own
    /// client after each round. Receivers keep the max they have seen.
    SessionScore {
        session: SessionId,
        handle: String,
        score: u64,
    },
    /// Full-state snapshot for late or lossy joiners, published by the
    /// session initiator at phase changes.
    SessionState {
        session: SessionId,
        phase: Phase,
        players: Vec<ScoredPlayer>,
    },
    SessionCancelled {
        session: SessionId,
        reason: String,
    },
    RoundRequest {
        session: SessionId,
        round: u32,
    },
    RoundContent {
        session: SessionId,
        round: u32,
        hands: Vec<RoundEntry>,
    },
    DuelChallenge {
        challenger: PlayerRef,
        target: String,
        kind: DuelKind,
        wager: u64,
        nonce: u64,
    },
    DuelResponse {
        challenger: String,
        target: String,
        accepted: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u8,
    pub event: RelayEvent,
}

impl Envelope {
    pub const VERSION: u8 = 1;

    pub fn new(event: RelayEvent) -> Self {
        Self {
            v: Self::VERSION,
            event,
        }
    }

    pub fn encode(&self) -> Result<Bytes, ProtoError> {
        let v = serde_json::to_vec(self).map_err(|e| ProtoError::BadJson(e.to_string()))?;
        Ok(Bytes::from(v))
    }

    pub fn decode(b: &[u8]) -> Result<Self, ProtoError> {
        let env: Envelope =
            serde_json::from_slice(b).map_err(|e| ProtoError::BadJson(e.to_string()))?;
        if env.v != Self::VERSION {
            return Err(ProtoError::UnknownVersion(env.v));
        }
        Ok(env)
    }
}
