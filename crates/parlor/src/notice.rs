//! Driver-to-presenter messages. The drivers never render; they push
//! plain data over a bounded channel and a presenter (terminal UI, bot
//! script) turns it into screens. A presenter that stops reading only
//! costs itself dropped notices; session timing is never blocked on it.

use parlorproto::event::{PlayerRef, ScoredPlayer};
use parlorproto::session::{DuelKind, GameKind, Phase, SessionId};

use crate::duel::DuelReport;
use crate::rewards::RewardOutcome;

#[derive(Debug, Clone)]
pub enum Notice {
    SessionAnnounced {
        session: SessionId,
        kind: GameKind,
        rounds: u32,
        join_window_s: u64,
    },
    JoinCountdown {
        session: SessionId,
        secs_left: u64,
    },
    PlayerJoined {
        session: SessionId,
        name: String,
        count: usize,
    },
    PhaseChanged {
        session: SessionId,
        phase: Phase,
    },
    RoundPrompt {
        session: SessionId,
        round: u32,
        rounds: u32,
        kind: GameKind,
        hand: Vec<u8>,
        dwell_ms: u64,
    },
    RoundScored {
        session: SessionId,
        round: u32,
        score: u64,
        total: u64,
    },
    Leaderboard {
        session: SessionId,
        standings: Vec<ScoredPlayer>,
    },
    SessionEnded {
        session: SessionId,
        standings: Vec<ScoredPlayer>,
        own: Option<RewardOutcome>,
    },
    SessionCancelled {
        session: SessionId,
        reason: String,
    },
    DuelAsked {
        challenger: PlayerRef,
        kind: DuelKind,
        wager: u64,
        secs_to_answer: u64,
    },
    DuelPrompt {
        kind: DuelKind,
        dwell_ms: u64,
    },
    DuelResolved {
        report: DuelReport,
    },
}

/// Presenter-to-driver replies. One channel per driver; the driver
/// drains stale entries before each prompt, so a late keypress from a
/// previous round cannot answer the next one.
#[derive(Debug, Clone)]
pub enum Answer {
    /// Local input for the current round, with how long it took.
    Round { elapsed_ms: u64 },
    /// Accept or decline a duel challenge.
    Duel { accept: bool },
}
