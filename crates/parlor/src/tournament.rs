//! Tournament lifecycle: announce, gather, play rounds, settle.
//!
//! One [`Tournament`] value holds everything a session ever owns; it is
//! created when the local player hosts or joins and dropped once the
//! final report is out, so no session state survives the session.
//! [`TourneyDriver`] runs the flow against the relay. Every wait is
//! deadline-bounded and every inbound event is an idempotent merge, so
//! a lossy, duplicating relay can only slow a session down, not wedge
//! or corrupt it.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parlorproto::event::{Envelope, PlayerRef, RelayEvent, RoundEntry, ScoredPlayer};
use parlorproto::session::{GameKind, Phase, SessionId};

use crate::clock::{Deadline, Ticker};
use crate::ledger::{now_unix_ms, Ledger, LedgerRecord};
use crate::notice::{Answer, Notice};
use crate::profile::ProfileStore;
use crate::registry::Roster;
use crate::relay::{RelayFeed, RelayHandle};
use crate::rewards::{compute_rewards, RewardOutcome};
use crate::rounds::{self, RoundSync, ROUND_CONTENT_TIMEOUT_MS};

/// A tournament below this many players cancels instead of starting.
pub const MIN_PLAYERS: usize = 2;

pub const REASON_INSUFFICIENT: &str = "insufficient participants";
pub const REASON_CONTENT_TIMEOUT: &str = "round content timeout";
pub const REASON_PEER: &str = "cancelled by peer";

#[derive(Debug, Clone)]
pub struct TourneyConfig {
    pub rounds: u32,
    pub join_window_s: u64,
    /// Input window for each round, also the scoring clock.
    pub round_dwell_ms: u64,
    /// Pause between rounds while scores settle on screen.
    pub inter_round_ms: u64,
    pub content_timeout_ms: u64,
    /// Extra headroom on the whole-session deadline.
    pub session_slack_ms: u64,
}

impl Default for TourneyConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            join_window_s: 30,
            round_dwell_ms: 4_000,
            inter_round_ms: 2_000,
            content_timeout_ms: ROUND_CONTENT_TIMEOUT_MS,
            session_slack_ms: 10_000,
        }
    }
}

impl TourneyConfig {
    /// Hard upper bound on a whole session: join window, worst-case
    /// rounds, slack. Nothing outlives it.
    pub fn session_budget_ms(&self, join_window_s: u64, rounds: u32) -> u64 {
        let per_round = self
            .content_timeout_ms
            .saturating_add(self.round_dwell_ms)
            .saturating_add(self.inter_round_ms);
        join_window_s
            .saturating_mul(1000)
            .saturating_add(per_round.saturating_mul(rounds as u64))
            .saturating_add(self.session_slack_ms)
    }
}

/// All state for one session. Phase moves forward only; `Ended` and
/// `Cancelled` absorb everything after them.
#[derive(Debug)]
pub struct Tournament {
    pub session: SessionId,
    pub kind: GameKind,
    pub rounds: u32,
    pub roster: Roster,
    pub current_round: Option<u32>,
    phase: Phase,
    running: bool,
}

impl Tournament {
    pub fn new(session: SessionId, kind: GameKind, rounds: u32) -> Self {
        Self {
            session,
            kind,
            rounds: rounds.max(1),
            roster: Roster::new(),
            current_round: None,
            phase: Phase::Idle,
            running: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Advance the lifecycle. Returns false (and changes nothing) for
    /// anything but a legal forward step, so duplicate or stale phase
    /// events are harmless.
    pub fn set_phase(&mut self, to: Phase) -> bool {
        if self.phase == to || self.phase.is_terminal() {
            return false;
        }
        let ok = match to {
            Phase::Idle => false,
            Phase::Joining => self.phase == Phase::Idle,
            Phase::Active => self.phase == Phase::Joining,
            Phase::Ended => self.phase == Phase::Active,
            Phase::Cancelled => matches!(self.phase, Phase::Joining | Phase::Active),
        };
        if ok {
            self.phase = to;
        }
        ok
    }

    /// One-shot guard for the round loop. A re-delivered snapshot or
    /// phase event must never start a second loop over the same session.
    pub fn try_begin_running(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        true
    }
}

/// Final word on a session, returned to the shell that started it.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: SessionId,
    pub phase: Phase,
    pub standings: Vec<ScoredPlayer>,
    pub own: Option<RewardOutcome>,
    pub cancel_reason: Option<String>,
}

enum RoundFlow {
    Done,
    ContentTimeout,
    Halted,
}

enum Fetch {
    Hands(Vec<RoundEntry>),
    TimedOut,
    Halted,
}

pub struct TourneyDriver {
    me: PlayerRef,
    cfg: TourneyConfig,
    relay: RelayHandle,
    feed: RelayFeed,
    notices: mpsc::Sender<Notice>,
    answers: mpsc::Receiver<Answer>,
    profiles: ProfileStore,
    ledger: Ledger,
    sync: RoundSync,
    cancel_reason: Option<String>,
    relay_gone: bool,
}

impl TourneyDriver {
    pub fn new(
        me: PlayerRef,
        cfg: TourneyConfig,
        relay: RelayHandle,
        feed: RelayFeed,
        notices: mpsc::Sender<Notice>,
        answers: mpsc::Receiver<Answer>,
        profiles: ProfileStore,
        ledger: Ledger,
    ) -> Self {
        let me = PlayerRef {
            handle: crate::registry::normalize_handle(&me.handle),
            name: me.name,
        };
        Self {
            me,
            cfg,
            relay,
            feed,
            notices,
            answers,
            profiles,
            ledger,
            sync: RoundSync::new(),
            cancel_reason: None,
            relay_gone: false,
        }
    }

    /// Announce a new tournament and run it to a terminal phase.
    pub async fn host(mut self, kind: GameKind) -> anyhow::Result<SessionReport> {
        let session = new_session_id();
        let mut t = Tournament::new(session, kind, self.cfg.rounds);
        t.set_phase(Phase::Joining);

        let window_s = self.cfg.join_window_s;
        self.relay.publish(&Envelope::new(RelayEvent::SessionStart {
            session,
            kind,
            rounds: t.rounds,
            join_window_s: window_s,
        }));
        self.relay.publish(&Envelope::new(RelayEvent::SessionJoin {
            session,
            player: self.me.clone(),
        }));
        t.roster.upsert(&self.me.handle, &self.me.name);
        let _ = self.notices.try_send(Notice::SessionAnnounced {
            session,
            kind,
            rounds: t.rounds,
            join_window_s: window_s,
        });
        info!(
            session = %session,
            kind = kind.as_str(),
            rounds = t.rounds,
            "tournament announced"
        );

        self.run(t, window_s, true).await
    }

    /// Join a tournament someone else announced, then run the same flow.
    /// `rounds` and `join_window_s` come from the announcement.
    pub async fn join(
        mut self,
        session: SessionId,
        kind: GameKind,
        rounds: u32,
        join_window_s: u64,
    ) -> anyhow::Result<SessionReport> {
        let mut t = Tournament::new(session, kind, rounds);
        t.set_phase(Phase::Joining);
        self.relay.publish(&Envelope::new(RelayEvent::SessionJoin {
            session,
            player: self.me.clone(),
        }));
        t.roster.upsert(&self.me.handle, &self.me.name);
        info!(session = %session, kind = kind.as_str(), "joined tournament");

        self.run(t, join_window_s, false).await
    }

    async fn run(
        mut self,
        mut t: Tournament,
        window_s: u64,
        initiator: bool,
    ) -> anyhow::Result<SessionReport> {
        let overall = Deadline::after_ms(self.cfg.session_budget_ms(window_s, t.rounds));

        // Join window: gather players, tick a countdown.
        let join_deadline = Deadline::after_ms(window_s.saturating_mul(1000));
        let mut ticker = Ticker::secondly(join_deadline);
        while t.phase() == Phase::Joining {
            tokio::select! {
                _ = join_deadline.sleep() => break,
                left = ticker.tick() => match left {
                    Some(secs_left) => {
                        let _ = self.notices.try_send(Notice::JoinCountdown {
                            session: t.session,
                            secs_left,
                        });
                    }
                    None => break,
                },
                ev = self.feed.recv(), if !self.relay_gone => self.on_event(&mut t, ev),
            }
        }

        // Local deadline decision, unless a peer already advanced us.
        if t.phase() == Phase::Joining {
            if t.roster.len() >= MIN_PLAYERS {
                t.set_phase(Phase::Active);
                if initiator {
                    self.relay.publish(&Envelope::new(RelayEvent::SessionPhase {
                        session: t.session,
                        phase: Phase::Active,
                    }));
                    self.relay.publish(&Envelope::new(RelayEvent::SessionState {
                        session: t.session,
                        phase: Phase::Active,
                        players: t.roster.as_scored(),
                    }));
                }
                let _ = self.notices.try_send(Notice::PhaseChanged {
                    session: t.session,
                    phase: Phase::Active,
                });
                info!(session = %t.session, players = t.roster.len(), "tournament active");
            } else {
                t.set_phase(Phase::Cancelled);
                self.cancel_reason = Some(REASON_INSUFFICIENT.to_string());
                if initiator {
                    self.relay.publish(&Envelope::new(RelayEvent::SessionCancelled {
                        session: t.session,
                        reason: REASON_INSUFFICIENT.to_string(),
                    }));
                }
                warn!(
                    session = %t.session,
                    players = t.roster.len(),
                    "cancelling: not enough players"
                );
            }
        }

        // Round loop, entered at most once per session.
        if t.phase() == Phase::Active && t.try_begin_running() {
            let mut round: u32 = 1;
            while round <= t.rounds && t.phase() == Phase::Active {
                if overall.expired() {
                    warn!(session = %t.session, round, "session budget spent; ending early");
                    break;
                }
                t.current_round = Some(round);
                match self.play_round(&mut t, round).await {
                    RoundFlow::Done => round += 1,
                    RoundFlow::ContentTimeout => {
                        t.set_phase(Phase::Cancelled);
                        self.cancel_reason = Some(REASON_CONTENT_TIMEOUT.to_string());
                        warn!(
                            session = %t.session,
                            round,
                            "no round content in time; cancelling locally"
                        );
                    }
                    RoundFlow::Halted => {}
                }
            }
            t.current_round = None;
            if t.phase() == Phase::Active {
                t.set_phase(Phase::Ended);
            }
        }

        self.finish(t).await
    }

    async fn play_round(&mut self, t: &mut Tournament, round: u32) -> RoundFlow {
        let hands = match self.fetch_content(t, round).await {
            Fetch::Hands(h) => h,
            Fetch::TimedOut => return RoundFlow::ContentTimeout,
            Fetch::Halted => return RoundFlow::Halted,
        };

        let roster_handles: Vec<String> =
            t.roster.members().iter().map(|p| p.handle.clone()).collect();
        for h in rounds::missing_entries(&hands, &roster_handles) {
            warn!(session = %t.session, round, handle = %h, "no dealt hand; zero for the round");
        }

        let dwell = self.cfg.round_dwell_ms;
        let score = match rounds::hand_for(&hands, &self.me.handle) {
            None => 0,
            Some(hand) if !rounds::valid_hand(t.kind, hand) => {
                warn!(session = %t.session, round, "malformed hand; zero for the round");
                0
            }
            Some(hand) => {
                let hand = hand.to_vec();
                self.drain_answers();
                let _ = self.notices.try_send(Notice::RoundPrompt {
                    session: t.session,
                    round,
                    rounds: t.rounds,
                    kind: t.kind,
                    hand: hand.clone(),
                    dwell_ms: dwell,
                });
                let deadline = Deadline::after_ms(dwell);
                let elapsed = self.await_round_answer(t, &deadline, dwell).await;
                if t.phase() != Phase::Active {
                    return RoundFlow::Halted;
                }
                rounds::score_round(t.kind, &hand, elapsed, dwell)
            }
        };

        let total = t
            .roster
            .get(&self.me.handle)
            .map(|p| p.score)
            .unwrap_or(0)
            .saturating_add(score);
        t.roster.apply_score(&self.me.handle, total);
        self.relay.publish(&Envelope::new(RelayEvent::SessionScore {
            session: t.session,
            handle: self.me.handle.clone(),
            score: total,
        }));
        info!(session = %t.session, round, score, total, "round scored");
        let _ = self.notices.try_send(Notice::RoundScored {
            session: t.session,
            round,
            score,
            total,
        });
        let _ = self.notices.try_send(Notice::Leaderboard {
            session: t.session,
            standings: standings_of(&t.roster),
        });

        // Let the table breathe between rounds; keep merging events.
        let pause = Deadline::after_ms(self.cfg.inter_round_ms);
        loop {
            if t.phase() != Phase::Active {
                return RoundFlow::Halted;
            }
            tokio::select! {
                _ = pause.sleep() => break,
                ev = self.feed.recv(), if !self.relay_gone => self.on_event(t, ev),
            }
        }
        RoundFlow::Done
    }

    async fn fetch_content(&mut self, t: &mut Tournament, round: u32) -> Fetch {
        if let Some(h) = self.sync.cached(t.session, round) {
            return Fetch::Hands(h.to_vec());
        }
        self.relay.publish(&Envelope::new(RelayEvent::RoundRequest {
            session: t.session,
            round,
        }));
        debug!(session = %t.session, round, "round content requested");

        let deadline = Deadline::after_ms(self.cfg.content_timeout_ms);
        loop {
            if t.phase() != Phase::Active {
                return Fetch::Halted;
            }
            if let Some(h) = self.sync.cached(t.session, round) {
                return Fetch::Hands(h.to_vec());
            }
            tokio::select! {
                _ = deadline.sleep() => return Fetch::TimedOut,
                ev = self.feed.recv(), if !self.relay_gone => self.on_event(t, ev),
            }
        }
    }

    async fn await_round_answer(
        &mut self,
        t: &mut Tournament,
        deadline: &Deadline,
        dwell: u64,
    ) -> Option<u64> {
        loop {
            if t.phase() != Phase::Active {
                return None;
            }
            tokio::select! {
                _ = deadline.sleep() => return None,
                a = self.answers.recv() => match a {
                    Some(Answer::Round { elapsed_ms }) => return Some(elapsed_ms.min(dwell)),
                    Some(_) => continue,
                    None => return None,
                },
                ev = self.feed.recv(), if !self.relay_gone => self.on_event(t, ev),
            }
        }
    }

    /// Merge one relay event into session state. Safe to call with
    /// duplicates and reorders of anything.
    fn on_event(&mut self, t: &mut Tournament, ev: Option<Envelope>) {
        let Some(env) = ev else {
            warn!(session = %t.session, "relay feed closed; running on local deadlines");
            self.relay_gone = true;
            return;
        };
        match env.event {
            RelayEvent::SessionJoin { session, player } if session == t.session => {
                if t.phase() == Phase::Joining && t.roster.upsert(&player.handle, &player.name) {
                    info!(
                        session = %session,
                        handle = %player.handle,
                        players = t.roster.len(),
                        "player joined"
                    );
                    let _ = self.notices.try_send(Notice::PlayerJoined {
                        session,
                        name: player.name,
                        count: t.roster.len(),
                    });
                }
            }
            RelayEvent::SessionScore {
                session,
                handle,
                score,
            } if session == t.session => {
                if !t.is_terminal() {
                    t.roster.apply_score(&handle, score);
                }
            }
            RelayEvent::SessionPhase { session, phase } if session == t.session => {
                if t.set_phase(phase) {
                    info!(session = %session, phase = phase.as_str(), "phase advanced by peer");
                    if phase == Phase::Cancelled && self.cancel_reason.is_none() {
                        self.cancel_reason = Some(REASON_PEER.to_string());
                    }
                    let _ = self.notices.try_send(Notice::PhaseChanged { session, phase });
                }
            }
            RelayEvent::SessionState {
                session,
                phase,
                players,
            } if session == t.session => {
                if !t.is_terminal() {
                    t.roster.merge_snapshot(&players);
                }
                if t.set_phase(phase) {
                    info!(session = %session, phase = phase.as_str(), "reconciled from snapshot");
                    if phase == Phase::Cancelled && self.cancel_reason.is_none() {
                        self.cancel_reason = Some(REASON_PEER.to_string());
                    }
                    let _ = self.notices.try_send(Notice::PhaseChanged { session, phase });
                }
            }
            RelayEvent::SessionCancelled { session, reason } if session == t.session => {
                if t.set_phase(Phase::Cancelled) {
                    warn!(session = %session, reason = %reason, "session cancelled by peer");
                    self.cancel_reason = Some(reason);
                }
            }
            RelayEvent::RoundContent {
                session,
                round,
                hands,
            } if session == t.session => {
                if !t.is_terminal() {
                    if self.sync.insert(session, round, hands) {
                        debug!(session = %session, round, "round content cached");
                    } else {
                        debug!(session = %session, round, "duplicate round content ignored");
                    }
                }
            }
            // Round requests are the content authority's business, and
            // duels run on their own driver. Other sessions' traffic
            // falls through here too.
            _ => {}
        }
    }

    async fn finish(mut self, mut t: Tournament) -> anyhow::Result<SessionReport> {
        if t.phase() == Phase::Ended {
            let standings = t.roster.leaderboard();
            let outcomes = compute_rewards(&standings);
            for o in &outcomes {
                t.roster.set_gold_earned(&o.handle, o.gold);
            }
            let own = outcomes.iter().find(|o| o.handle == self.me.handle).cloned();
            if let Some(own) = &own {
                let _settle = self.profiles.guard(&self.me.handle).await;
                let mut p = self.profiles.load(&self.me.handle, &self.me.name).await;
                p.gold = p.gold.saturating_add(own.gold);
                p.xp = p.xp.saturating_add(own.xp);
                p.reputation = p.reputation.saturating_add(own.reputation);
                p.tourneys_played = p.tourneys_played.saturating_add(1);
                if own.rank == 1 {
                    p.tourneys_won = p.tourneys_won.saturating_add(1);
                }
                if let Err(e) = self.profiles.save(&mut p).await {
                    warn!(err = %e, handle = %self.me.handle, "reward save failed");
                }
                self.ledger.try_append(LedgerRecord {
                    v: 1,
                    ts_unix_ms: now_unix_ms(),
                    session: t.session.to_hex(),
                    mode: "tournament".into(),
                    handle: self.me.handle.clone(),
                    outcome: "ended".into(),
                    rank: Some(own.rank),
                    score: Some(own.score),
                    gold_delta: own.gold as i64,
                    xp_delta: own.xp as i64,
                });
                info!(
                    session = %t.session,
                    rank = own.rank,
                    gold = own.gold,
                    xp = own.xp,
                    "rewards applied"
                );
            }
            let scored = standings
                .into_iter()
                .map(|p| ScoredPlayer {
                    handle: p.handle,
                    name: p.name,
                    score: p.score,
                })
                .collect::<Vec<_>>();
            let _ = self.notices.try_send(Notice::SessionEnded {
                session: t.session,
                standings: scored.clone(),
                own: own.clone(),
            });
            return Ok(SessionReport {
                session: t.session,
                phase: Phase::Ended,
                standings: scored,
                own,
                cancel_reason: None,
            });
        }

        let reason = self
            .cancel_reason
            .take()
            .unwrap_or_else(|| "cancelled".to_string());
        t.set_phase(Phase::Cancelled);
        let _ = self.notices.try_send(Notice::SessionCancelled {
            session: t.session,
            reason: reason.clone(),
        });
        self.ledger.try_append(LedgerRecord {
            v: 1,
            ts_unix_ms: now_unix_ms(),
            session: t.session.to_hex(),
            mode: "tournament".into(),
            handle: self.me.handle.clone(),
            outcome: "cancelled".into(),
            rank: None,
            score: None,
            gold_delta: 0,
            xp_delta: 0,
        });
        info!(session = %t.session, reason = %reason, "session closed without rewards");
        Ok(SessionReport {
            session: t.session,
            phase: Phase::Cancelled,
            standings: standings_of(&t.roster),
            own: None,
            cancel_reason: Some(reason),
        })
    }

    fn drain_answers(&mut self) {
        while self.answers.try_recv().is_ok() {}
    }
}

fn standings_of(roster: &Roster) -> Vec<ScoredPlayer> {
    roster
        .leaderboard()
        .into_iter()
        .map(|p| ScoredPlayer {
            handle: p.handle,
            name: p.name,
            score: p.score,
        })
        .collect()
}

fn new_session_id() -> SessionId {
    let mut b = [0u8; 16];
    getrandom::getrandom(&mut b).expect("getrandom");
    SessionId::from_be_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::STARTING_GOLD;
    use crate::relay::{HubConfig, LocalHub};
    use std::path::PathBuf;

    fn scratch_dir(tag: &str) -> PathBuf {
        let mut b = [0u8; 8];
        getrandom::getrandom(&mut b).expect("getrandom");
        std::env::temp_dir().join(format!("parlor_tourney_{tag}_{:016x}", u64::from_be_bytes(b)))
    }

    fn quick_cfg() -> TourneyConfig {
        TourneyConfig {
            rounds: 3,
            join_window_s: 2,
            round_dwell_ms: 4_000,
            inter_round_ms: 500,
            content_timeout_ms: 10_000,
            session_slack_ms: 10_000,
        }
    }

    /// Presenter that plays every round prompt with a fixed reaction.
    fn playing_presenter(
        mut notices: mpsc::Receiver<Notice>,
        answers: mpsc::Sender<Answer>,
        elapsed_ms: u64,
    ) {
        tokio::spawn(async move {
            while let Some(n) = notices.recv().await {
                if let Notice::RoundPrompt { .. } = n {
                    let _ = answers.send(Answer::Round { elapsed_ms }).await;
                }
            }
        });
    }

    /// Content authority stand-in: answers every round request with the
    /// same fixed hands.
    fn fixed_dealer(
        relay: RelayHandle,
        mut feed: RelayFeed,
        hands: Vec<(&'static str, Vec<u8>)>,
    ) {
        tokio::spawn(async move {
            while let Some(env) = feed.recv().await {
                if let RelayEvent::RoundRequest { session, round } = env.event {
                    let hands = hands
                        .iter()
                        .map(|(h, hand)| RoundEntry {
                            handle: (*h).to_string(),
                            hand: hand.clone(),
                        })
                        .collect();
                    relay.publish(&Envelope::new(RelayEvent::RoundContent {
                        session,
                        round,
                        hands,
                    }));
                }
            }
        });
    }

    fn driver_with(
        relay: RelayHandle,
        feed: RelayFeed,
        handle: &str,
        cfg: TourneyConfig,
        store: &ProfileStore,
        elapsed_ms: u64,
    ) -> TourneyDriver {
        let (n_tx, n_rx) = mpsc::channel(64);
        let (a_tx, a_rx) = mpsc::channel(8);
        playing_presenter(n_rx, a_tx, elapsed_ms);
        TourneyDriver::new(
            PlayerRef::new(handle, handle),
            cfg,
            relay,
            feed,
            n_tx,
            a_rx,
            store.clone(),
            Ledger::disabled(),
        )
    }

    async fn wait_for_start(feed: &mut RelayFeed) -> (SessionId, GameKind, u32, u64) {
        loop {
            let env = feed.recv().await.expect("relay open");
            if let RelayEvent::SessionStart {
                session,
                kind,
                rounds,
                join_window_s,
            } = env.event
            {
                return (session, kind, rounds, join_window_s);
            }
        }
    }

    #[test]
    fn phase_only_moves_forward() {
        let mut t = Tournament::new(SessionId(1), GameKind::HighCard, 3);
        assert_eq!(t.phase(), Phase::Idle);
        assert!(t.set_phase(Phase::Joining));
        assert!(!t.set_phase(Phase::Idle));
        assert!(!t.set_phase(Phase::Ended), "ended straight from joining");
        assert!(t.set_phase(Phase::Active));
        assert!(!t.set_phase(Phase::Joining));
        assert!(!t.set_phase(Phase::Active), "duplicate is a no-op");
        assert!(t.set_phase(Phase::Ended));
        assert!(!t.set_phase(Phase::Cancelled), "terminal absorbs");
        assert_eq!(t.phase(), Phase::Ended);
    }

    #[test]
    fn cancel_reachable_only_from_joining_or_active() {
        let mut t = Tournament::new(SessionId(1), GameKind::DiceRun, 1);
        assert!(!t.set_phase(Phase::Cancelled), "not from idle");
        t.set_phase(Phase::Joining);
        assert!(t.set_phase(Phase::Cancelled));
        assert!(t.is_terminal());

        let mut t = Tournament::new(SessionId(2), GameKind::DiceRun, 1);
        t.set_phase(Phase::Joining);
        t.set_phase(Phase::Active);
        assert!(t.set_phase(Phase::Cancelled));
    }

    #[test]
    fn round_loop_guard_is_one_shot() {
        let mut t = Tournament::new(SessionId(1), GameKind::HighCard, 3);
        assert!(t.try_begin_running());
        assert!(!t.try_begin_running());
    }

    #[test]
    fn session_budget_covers_worst_case() {
        let cfg = quick_cfg();
        let per_round = 10_000 + 4_000 + 500;
        assert_eq!(
            cfg.session_budget_ms(2, 3),
            2_000 + 3 * per_round + 10_000
        );
    }

    #[tokio::test(start_paused = true)]
    async fn two_clients_play_a_full_tournament() {
        let dir = scratch_dir("full");
        let store = ProfileStore::new(&dir);
        let hub = LocalHub::new(HubConfig::default());

        let (d_relay, d_feed) = hub.attach().await;
        fixed_dealer(d_relay, d_feed, vec![("ada", vec![51]), ("bix", vec![0])]);

        // The joiner is on the relay before the announcement goes out.
        let (bix_relay, mut bix_feed) = hub.attach().await;

        let (ada_relay, ada_feed) = hub.attach().await;
        let ada = driver_with(ada_relay, ada_feed, "ada", quick_cfg(), &store, 100);
        let host = tokio::spawn(async move { ada.host(GameKind::HighCard).await.unwrap() });

        let (session, kind, rounds, window) = wait_for_start(&mut bix_feed).await;
        assert_eq!(kind, GameKind::HighCard);
        let bix = driver_with(bix_relay, bix_feed, "bix", quick_cfg(), &store, 200);
        let join =
            tokio::spawn(async move { bix.join(session, kind, rounds, window).await.unwrap() });

        let ada_report = host.await.unwrap();
        let bix_report = join.await.unwrap();

        // Card 51 is rank 12 (70/round), card 0 is rank 0 (10/round).
        assert_eq!(ada_report.phase, Phase::Ended);
        assert_eq!(bix_report.phase, Phase::Ended);
        let expect: Vec<(String, u64)> = vec![("ada".into(), 210), ("bix".into(), 30)];
        for report in [&ada_report, &bix_report] {
            let got: Vec<(String, u64)> = report
                .standings
                .iter()
                .map(|p| (p.handle.clone(), p.score))
                .collect();
            assert_eq!(got, expect, "standings agree on both clients");
        }

        let ada_own = ada_report.own.unwrap();
        assert_eq!(ada_own.rank, 1);
        assert_eq!(ada_own.gold, 210 / 50 + 100 + 5);
        assert_eq!(ada_own.xp, 210 / 100 + 150 + 10);
        assert_eq!(ada_own.reputation, 210 / 200 + 25 + 1);
        let bix_own = bix_report.own.unwrap();
        assert_eq!(bix_own.rank, 2);
        assert_eq!(bix_own.gold, 55);

        let ada_p = store.load("ada", "ada").await;
        assert_eq!(ada_p.gold, STARTING_GOLD + ada_own.gold);
        assert_eq!(ada_p.tourneys_played, 1);
        assert_eq!(ada_p.tourneys_won, 1);
        let bix_p = store.load("bix", "bix").await;
        assert_eq!(bix_p.gold, STARTING_GOLD + 55);
        assert_eq!(bix_p.tourneys_won, 0);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test(start_paused = true)]
    async fn lone_host_cancels_for_lack_of_players() {
        let dir = scratch_dir("lone");
        let store = ProfileStore::new(&dir);
        let hub = LocalHub::new(HubConfig::default());

        let (obs_relay, mut obs_feed) = hub.attach().await;
        drop(obs_relay);

        let (relay, feed) = hub.attach().await;
        let ada = driver_with(relay, feed, "ada", quick_cfg(), &store, 100);
        let report = ada.host(GameKind::DiceRun).await.unwrap();

        assert_eq!(report.phase, Phase::Cancelled);
        assert_eq!(report.cancel_reason.as_deref(), Some(REASON_INSUFFICIENT));
        assert!(report.own.is_none());
        assert_eq!(store.load("ada", "ada").await.tourneys_played, 0);

        // The cancellation went out on the wire for everyone else.
        let mut saw_cancel = false;
        while let Ok(Some(env)) =
            tokio::time::timeout(std::time::Duration::from_millis(100), obs_feed.recv()).await
        {
            if let RelayEvent::SessionCancelled { reason, .. } = env.event {
                assert_eq!(reason, REASON_INSUFFICIENT);
                saw_cancel = true;
            }
        }
        assert!(saw_cancel);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_dealer_cancels_after_content_timeout() {
        let dir = scratch_dir("nodealer");
        let store = ProfileStore::new(&dir);
        let hub = LocalHub::new(HubConfig::default());

        let (bix_relay, mut bix_feed) = hub.attach().await;
        let (ada_relay, ada_feed) = hub.attach().await;
        let ada = driver_with(ada_relay, ada_feed, "ada", quick_cfg(), &store, 100);
        let host = tokio::spawn(async move { ada.host(GameKind::HighCard).await.unwrap() });

        let (session, kind, rounds, window) = wait_for_start(&mut bix_feed).await;
        let bix = driver_with(bix_relay, bix_feed, "bix", quick_cfg(), &store, 200);
        let join =
            tokio::spawn(async move { bix.join(session, kind, rounds, window).await.unwrap() });

        for report in [host.await.unwrap(), join.await.unwrap()] {
            assert_eq!(report.phase, Phase::Cancelled);
            assert_eq!(
                report.cancel_reason.as_deref(),
                Some(REASON_CONTENT_TIMEOUT)
            );
            assert!(report.own.is_none());
        }
        assert_eq!(store.load("ada", "ada").await.gold, STARTING_GOLD);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_fetch_reuses_cache_without_a_second_request() {
        let dir = scratch_dir("refetch");
        let store = ProfileStore::new(&dir);
        let hub = LocalHub::new(HubConfig::default());

        let (d_relay, d_feed) = hub.attach().await;
        fixed_dealer(d_relay, d_feed, vec![("ada", vec![40]), ("bix", vec![2])]);

        // Counts every round_request that actually hits the wire.
        let (watch_relay, mut watch_feed) = hub.attach().await;
        drop(watch_relay);

        let (relay, feed) = hub.attach().await;
        let mut drv = driver_with(relay, feed, "ada", quick_cfg(), &store, 100);
        let mut t = Tournament::new(SessionId(77), GameKind::HighCard, 3);
        t.set_phase(Phase::Joining);
        t.set_phase(Phase::Active);
        t.roster.upsert("ada", "ada");
        t.roster.upsert("bix", "bix");

        let first = match drv.fetch_content(&mut t, 2).await {
            Fetch::Hands(h) => h,
            _ => panic!("first fetch should deal"),
        };
        let second = match drv.fetch_content(&mut t, 2).await {
            Fetch::Hands(h) => h,
            _ => panic!("second fetch should hit the cache"),
        };
        assert_eq!(first, second, "retransmitted fetch sees identical hands");

        let mut requests = 0;
        while let Ok(Some(env)) =
            tokio::time::timeout(std::time::Duration::from_millis(100), watch_feed.recv()).await
        {
            if matches!(env.event, RelayEvent::RoundRequest { .. }) {
                requests += 1;
            }
        }
        assert_eq!(requests, 1, "cache hit must stay off the wire");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test(start_paused = true)]
    async fn duplicated_delivery_changes_nothing() {
        let dir = scratch_dir("dup");
        let store = ProfileStore::new(&dir);
        // Every frame arrives twice.
        let hub = LocalHub::new(HubConfig {
            channel_capacity: 256,
            dup_every: 1,
        });

        let (d_relay, d_feed) = hub.attach().await;
        fixed_dealer(d_relay, d_feed, vec![("ada", vec![51]), ("bix", vec![0])]);

        let (bix_relay, mut bix_feed) = hub.attach().await;
        let (ada_relay, ada_feed) = hub.attach().await;
        let ada = driver_with(ada_relay, ada_feed, "ada", quick_cfg(), &store, 100);
        let host = tokio::spawn(async move { ada.host(GameKind::HighCard).await.unwrap() });

        let (session, kind, rounds, window) = wait_for_start(&mut bix_feed).await;
        let bix = driver_with(bix_relay, bix_feed, "bix", quick_cfg(), &store, 200);
        let join =
            tokio::spawn(async move { bix.join(session, kind, rounds, window).await.unwrap() });

        let ada_report = host.await.unwrap();
        let bix_report = join.await.unwrap();
        assert_eq!(ada_report.phase, Phase::Ended);
        let expect: Vec<(String, u64)> = vec![("ada".into(), 210), ("bix".into(), 30)];
        for report in [&ada_report, &bix_report] {
            let got: Vec<(String, u64)> = report
                .standings
                .iter()
                .map(|p| (p.handle.clone(), p.score))
                .collect();
            assert_eq!(got, expect, "duplicates neither double scores nor players");
        }

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_pulls_a_slow_joiner_into_active() {
        let dir = scratch_dir("snap");
        let store = ProfileStore::new(&dir);
        let hub = LocalHub::new(HubConfig::default());

        let (d_relay, d_feed) = hub.attach().await;
        fixed_dealer(d_relay, d_feed, vec![("ada", vec![25]), ("bix", vec![1])]);

        let (bix_relay, mut bix_feed) = hub.attach().await;
        let (ada_relay, ada_feed) = hub.attach().await;
        let ada = driver_with(ada_relay, ada_feed, "ada", quick_cfg(), &store, 100);
        let host = tokio::spawn(async move { ada.host(GameKind::HighCard).await.unwrap() });

        let (session, kind, rounds, _window) = wait_for_start(&mut bix_feed).await;
        // This joiner believes the window is far longer than the host's;
        // the host's phase broadcast must pull it into the rounds anyway.
        let bix = driver_with(bix_relay, bix_feed, "bix", quick_cfg(), &store, 200);
        let join =
            tokio::spawn(async move { bix.join(session, kind, rounds, 600).await.unwrap() });

        let ada_report = host.await.unwrap();
        let bix_report = join.await.unwrap();
        assert_eq!(ada_report.phase, Phase::Ended);
        assert_eq!(bix_report.phase, Phase::Ended);
        // Card 25 is rank 12 (70/round), card 1 is rank 1 (15/round).
        let expect: Vec<(String, u64)> = vec![("ada".into(), 210), ("bix".into(), 45)];
        for report in [&ada_report, &bix_report] {
            let got: Vec<(String, u64)> = report
                .standings
                .iter()
                .map(|p| (p.handle.clone(), p.score))
                .collect();
            assert_eq!(got, expect);
        }

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
