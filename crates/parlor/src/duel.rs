//! Head-to-head duels over the relay.
//!
//! The handshake is two events: a challenge carrying kind, wager and a
//! nonce, and exactly one accept/decline response. Everything after the
//! handshake is resolved locally: each client plays its own figure and
//! simulates the opponent from the shared nonce, so the two sides can
//! disagree about who won. That is the parlor's long-standing honor
//! system, kept as-is; only the handshake is on the wire.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use parlorproto::event::{Envelope, PlayerRef, RelayEvent};
use parlorproto::session::DuelKind;

use crate::clock::Deadline;
use crate::ledger::{now_unix_ms, Ledger, LedgerRecord};
use crate::notice::{Answer, Notice};
use crate::profile::ProfileStore;
use crate::registry::normalize_handle;
use crate::relay::{RelayFeed, RelayHandle};
use crate::rounds::Rng64;

/// How long a challenger waits for the target's response.
pub const DUEL_RESPONSE_TIMEOUT_MS: u64 = 30_000;
/// How long the target's accept prompt stays up. Shorter than the
/// challenger's wait so an answer still beats their timeout.
pub const DUEL_ASK_TIMEOUT_MS: u64 = 25_000;

/// XP at stake per duel, win or lose.
const DUEL_XP_STAKE: u64 = 15;

const CHALLENGER_SALT: u64 = 0x9E37_79B9_7F4A_7C15;
const TARGET_SALT: u64 = 0xC2B2_AE3D_27D4_EB4F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelResolution {
    Accepted,
    Declined,
    TimedOut,
}

impl DuelResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            DuelResolution::Accepted => "accepted",
            DuelResolution::Declined => "declined",
            DuelResolution::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DuelOutcome {
    pub won: bool,
    pub draw: bool,
    pub own_figure: u64,
    pub opponent_figure: u64,
    pub gold_delta: i64,
    pub xp_delta: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuelReport {
    pub kind: DuelKind,
    pub opponent: String,
    pub wager: u64,
    pub resolution: DuelResolution,
    /// Settled figures and deltas; `None` unless the duel was accepted.
    pub outcome: Option<DuelOutcome>,
}

#[derive(Debug, Clone)]
pub struct DuelConfig {
    pub response_timeout_ms: u64,
    pub ask_timeout_ms: u64,
    /// Local play window once a duel is on.
    pub draw_window_ms: u64,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: DUEL_RESPONSE_TIMEOUT_MS,
            ask_timeout_ms: DUEL_ASK_TIMEOUT_MS,
            draw_window_ms: 3_000,
        }
    }
}

enum Side {
    Challenger,
    Target,
}

pub struct DuelDriver {
    me: PlayerRef,
    cfg: DuelConfig,
    relay: RelayHandle,
    feed: RelayFeed,
    notices: mpsc::Sender<Notice>,
    answers: mpsc::Receiver<Answer>,
    profiles: ProfileStore,
    ledger: Ledger,
}

impl DuelDriver {
    pub fn new(
        me: PlayerRef,
        cfg: DuelConfig,
        relay: RelayHandle,
        feed: RelayFeed,
        notices: mpsc::Sender<Notice>,
        answers: mpsc::Receiver<Answer>,
        profiles: ProfileStore,
        ledger: Ledger,
    ) -> Self {
        let me = PlayerRef {
            handle: normalize_handle(&me.handle),
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
        }
    }

    /// Send a challenge and wait out the handshake. The wager is capped
    /// by the purse; nothing moves until a resolution is known.
    pub async fn challenge(
        &mut self,
        target: &str,
        kind: DuelKind,
        wager: u64,
    ) -> anyhow::Result<DuelReport> {
        let target = normalize_handle(target);
        let purse = self.profiles.load(&self.me.handle, &self.me.name).await;
        let wager = wager.min(purse.gold);
        let nonce = new_nonce();

        self.relay.publish(&Envelope::new(RelayEvent::DuelChallenge {
            challenger: self.me.clone(),
            target: target.clone(),
            kind,
            wager,
            nonce,
        }));
        info!(target = %target, kind = kind.as_str(), wager, "duel challenge sent");

        let deadline = Deadline::after_ms(self.cfg.response_timeout_ms);
        let accepted = loop {
            tokio::select! {
                _ = deadline.sleep() => break None,
                ev = self.feed.recv() => {
                    let Some(env) = ev else { break None; };
                    let RelayEvent::DuelResponse { challenger, target: resp_target, accepted } =
                        env.event
                    else {
                        continue;
                    };
                    if normalize_handle(&challenger) == self.me.handle
                        && normalize_handle(&resp_target) == target
                    {
                        break Some(accepted);
                    }
                }
            }
        };

        match accepted {
            None => {
                info!(target = %target, "duel response timed out");
                self.report_unplayed(kind, target, wager, DuelResolution::TimedOut)
            }
            Some(false) => {
                info!(target = %target, "duel declined");
                self.report_unplayed(kind, target, wager, DuelResolution::Declined)
            }
            Some(true) => self.resolve(kind, wager, nonce, &target, Side::Challenger).await,
        }
    }

    /// Answer an incoming challenge: prompt locally, then publish
    /// exactly one response. A lapsed prompt declines.
    pub async fn handle_challenge(
        &mut self,
        challenger: PlayerRef,
        kind: DuelKind,
        wager: u64,
        nonce: u64,
    ) -> anyhow::Result<DuelReport> {
        let opponent = normalize_handle(&challenger.handle);
        self.drain_answers();
        let _ = self.notices.try_send(Notice::DuelAsked {
            challenger: challenger.clone(),
            kind,
            wager,
            secs_to_answer: self.cfg.ask_timeout_ms / 1000,
        });

        let deadline = Deadline::after_ms(self.cfg.ask_timeout_ms);
        let accept = loop {
            tokio::select! {
                _ = deadline.sleep() => break false,
                a = self.answers.recv() => match a {
                    Some(Answer::Duel { accept }) => break accept,
                    Some(_) => continue,
                    None => break false,
                }
            }
        };

        self.relay.publish(&Envelope::new(RelayEvent::DuelResponse {
            challenger: opponent.clone(),
            target: self.me.handle.clone(),
            accepted: accept,
        }));

        if !accept {
            info!(challenger = %opponent, "duel declined locally");
            return self.report_unplayed(kind, opponent, wager, DuelResolution::Declined);
        }
        self.resolve(kind, wager, nonce, &opponent, Side::Target).await
    }

    /// Wait for the next challenge addressed to this player. Challenges
    /// aimed at anyone else keep flowing past. Returns `None` once the
    /// deadline lapses or the relay closes.
    pub async fn await_challenge(
        &mut self,
        deadline: &Deadline,
    ) -> Option<(PlayerRef, DuelKind, u64, u64)> {
        loop {
            tokio::select! {
                _ = deadline.sleep() => return None,
                ev = self.feed.recv() => {
                    let env = ev?;
                    let RelayEvent::DuelChallenge { challenger, target, kind, wager, nonce } =
                        env.event
                    else {
                        continue;
                    };
                    if normalize_handle(&target) == self.me.handle {
                        return Some((challenger, kind, wager, nonce));
                    }
                }
            }
        }
    }

    fn report_unplayed(
        &self,
        kind: DuelKind,
        opponent: String,
        wager: u64,
        resolution: DuelResolution,
    ) -> anyhow::Result<DuelReport> {
        let report = DuelReport {
            kind,
            opponent,
            wager,
            resolution,
            outcome: None,
        };
        let _ = self.notices.try_send(Notice::DuelResolved {
            report: report.clone(),
        });
        Ok(report)
    }

    async fn resolve(
        &mut self,
        kind: DuelKind,
        wager: u64,
        nonce: u64,
        opponent: &str,
        side: Side,
    ) -> anyhow::Result<DuelReport> {
        self.drain_answers();
        let dwell = self.cfg.draw_window_ms;
        let _ = self.notices.try_send(Notice::DuelPrompt {
            kind,
            dwell_ms: dwell,
        });

        let deadline = Deadline::after_ms(dwell);
        let elapsed = loop {
            tokio::select! {
                _ = deadline.sleep() => break None,
                a = self.answers.recv() => match a {
                    Some(Answer::Round { elapsed_ms }) => break Some(elapsed_ms.min(dwell)),
                    Some(_) => continue,
                    None => break None,
                }
            }
        };

        let own_figure = match kind {
            // Reaction time in ms; a lapsed window plays the worst case.
            DuelKind::QuickDraw => elapsed.unwrap_or(dwell),
            // Card cut: rank of a locally random card, timing irrelevant.
            DuelKind::HighCard => Rng64::from_seed(new_nonce()).roll_range(0, 51) % 13,
        };
        let opp_salt = match side {
            Side::Challenger => TARGET_SALT,
            Side::Target => CHALLENGER_SALT,
        };
        let mut sim = Rng64::from_seed(nonce ^ opp_salt);
        let opponent_figure = match kind {
            DuelKind::QuickDraw => sim.roll_range(150, 600),
            DuelKind::HighCard => sim.roll_range(0, 51) % 13,
        };

        let (won, draw) = match kind {
            DuelKind::QuickDraw => (
                own_figure < opponent_figure,
                own_figure == opponent_figure,
            ),
            DuelKind::HighCard => (
                own_figure > opponent_figure,
                own_figure == opponent_figure,
            ),
        };

        let (gold_delta, xp_delta) = if draw {
            (0i64, 0i64)
        } else if won {
            (wager as i64, DUEL_XP_STAKE as i64)
        } else {
            (-(wager as i64), -(DUEL_XP_STAKE as i64))
        };

        let _settle = self.profiles.guard(&self.me.handle).await;
        let mut profile = self.profiles.load(&self.me.handle, &self.me.name).await;
        profile.duels_played = profile.duels_played.saturating_add(1);
        if won {
            profile.duels_won = profile.duels_won.saturating_add(1);
            profile.gold = profile.gold.saturating_add(wager);
            profile.xp = profile.xp.saturating_add(DUEL_XP_STAKE);
        } else if !draw {
            profile.gold = profile.gold.saturating_sub(wager);
            profile.xp = profile.xp.saturating_sub(DUEL_XP_STAKE);
        }
        if let Err(e) = self.profiles.save(&mut profile).await {
            warn!(err = %e, handle = %self.me.handle, "duel profile save failed");
        }

        self.ledger.try_append(LedgerRecord {
            v: 1,
            ts_unix_ms: now_unix_ms(),
            session: format!("{nonce:016x}"),
            mode: "duel".into(),
            handle: self.me.handle.clone(),
            outcome: if draw {
                "draw".into()
            } else if won {
                "won".into()
            } else {
                "lost".into()
            },
            rank: None,
            score: None,
            gold_delta,
            xp_delta,
        });

        info!(
            opponent = %opponent,
            kind = kind.as_str(),
            own = own_figure,
            theirs = opponent_figure,
            won,
            draw,
            "duel resolved"
        );

        let report = DuelReport {
            kind,
            opponent: opponent.to_string(),
            wager,
            resolution: DuelResolution::Accepted,
            outcome: Some(DuelOutcome {
                won,
                draw,
                own_figure,
                opponent_figure,
                gold_delta,
                xp_delta,
            }),
        };
        let _ = self.notices.try_send(Notice::DuelResolved {
            report: report.clone(),
        });
        Ok(report)
    }

    fn drain_answers(&mut self) {
        while self.answers.try_recv().is_ok() {}
    }
}

pub(crate) fn new_nonce() -> u64 {
    let mut b = [0u8; 8];
    getrandom::getrandom(&mut b).expect("getrandom");
    u64::from_be_bytes(b)
}
