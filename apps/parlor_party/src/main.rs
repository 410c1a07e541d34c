//! Bot party for the parlor: spins up an in-process relay, a dealer,
//! and N bot players, runs one tournament (or one duel) end to end,
//! then prints a JSON report of what everyone walked away with.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use parlor::clock::Deadline;
use parlor::duel::{DuelConfig, DuelDriver, DuelReport, DuelResolution};
use parlor::ledger::{Ledger, LedgerConfig};
use parlor::notice::{Answer, Notice};
use parlor::profile::ProfileStore;
use parlor::relay::{HubConfig, LocalHub, RelayFeed, RelayHandle};
use parlor::rounds::{deal_hand, Rng64};
use parlor::tournament::{SessionReport, TourneyConfig, TourneyDriver};
use parlorproto::event::{Envelope, PlayerRef, RelayEvent, RoundEntry};
use parlorproto::session::{DuelKind, GameKind, Phase, SessionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Tournament,
    Duel,
}

#[derive(Clone, Debug)]
struct Config {
    bots: u32,
    rounds: u32,
    kind: GameKind,
    mode: Mode,
    wager: u64,
    data_dir: PathBuf,
    dup_every: u64,
    join_window_s: u64,
    seed: u64,
}

fn usage_and_exit() -> ! {
    eprintln!(
        "parlor_party\n\n\
USAGE:\n  parlor_party [--bots N] [--rounds N] [--kind high_card|quick_draw|dice_run]\n\
               [--mode tournament|duel] [--wager N] [--data-dir PATH]\n\
               [--dup-every N] [--join-window SECS] [--seed N]\n\n\
ENV:\n  BOTS  ROUNDS  KIND  MODE  WAGER  DATA_DIR  DUP_EVERY  JOIN_WINDOW  SEED\n"
    );
    std::process::exit(2);
}

fn parse_args() -> Config {
    fn env_u64(key: &str, default: u64) -> u64 {
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    let mut bots: u32 = env_u64("BOTS", 2).max(1) as u32;
    let mut rounds: u32 = env_u64("ROUNDS", 3).max(1) as u32;
    let mut kind = std::env::var("KIND")
        .ok()
        .and_then(|v| GameKind::parse(&v))
        .unwrap_or(GameKind::HighCard);
    let mut mode = match std::env::var("MODE").as_deref() {
        Ok("duel") => Mode::Duel,
        _ => Mode::Tournament,
    };
    let mut wager: u64 = env_u64("WAGER", 25);
    let mut data_dir =
        PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()));
    let mut dup_every: u64 = env_u64("DUP_EVERY", 0);
    let mut join_window_s: u64 = env_u64("JOIN_WINDOW", 5);
    let mut seed: u64 = env_u64("SEED", 1);

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bots" => {
                bots = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .map(|n: u32| n.max(1))
                    .unwrap_or_else(|| usage_and_exit())
            }
            "--rounds" => {
                rounds = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .map(|n: u32| n.max(1))
                    .unwrap_or_else(|| usage_and_exit())
            }
            "--kind" => {
                kind = it
                    .next()
                    .and_then(|v| GameKind::parse(&v))
                    .unwrap_or_else(|| usage_and_exit())
            }
            "--mode" => {
                mode = match it.next().as_deref() {
                    Some("tournament") => Mode::Tournament,
                    Some("duel") => Mode::Duel,
                    _ => usage_and_exit(),
                }
            }
            "--wager" => {
                wager = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_and_exit())
            }
            "--data-dir" => {
                data_dir = it.next().map(PathBuf::from).unwrap_or_else(|| usage_and_exit())
            }
            "--dup-every" => {
                dup_every = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_and_exit())
            }
            "--join-window" => {
                join_window_s = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_and_exit())
            }
            "--seed" => {
                seed = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_and_exit())
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        bots,
        rounds,
        kind,
        mode,
        wager,
        data_dir,
        dup_every,
        join_window_s,
        seed,
    }
}

#[derive(Serialize)]
struct PartyReport {
    ok: bool,
    mode: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tournaments: Vec<SessionReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    duels: Vec<DuelReport>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,parlor_party=info".into()),
        )
        .with_target(false)
        .init();

    let cfg = parse_args();
    let mode = match cfg.mode {
        Mode::Tournament => "tournament",
        Mode::Duel => "duel",
    };
    info!(mode, bots = cfg.bots, kind = cfg.kind.as_str(), "parlor party starting");

    let (tournaments, duels) = match cfg.mode {
        Mode::Tournament => (run_tournament(&cfg).await?, Vec::new()),
        Mode::Duel => (Vec::new(), run_duel(&cfg).await?),
    };

    let ok = tournaments.iter().all(|r| r.phase == Phase::Ended)
        && duels
            .iter()
            .all(|d| d.resolution == DuelResolution::Accepted);
    let out = PartyReport {
        ok,
        mode,
        tournaments,
        duels,
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_tournament(cfg: &Config) -> anyhow::Result<Vec<SessionReport>> {
    let hub = LocalHub::new(HubConfig {
        channel_capacity: 256,
        dup_every: cfg.dup_every,
    });
    let store = ProfileStore::new(cfg.data_dir.join("profiles"));
    let ledger = Ledger::new(LedgerConfig {
        enabled: true,
        dir: cfg.data_dir.join("ledger"),
        channel_capacity: 256,
    })
    .await;

    let (d_relay, d_feed) = hub.attach().await;
    dealer(d_relay, d_feed, cfg.seed);

    let tcfg = TourneyConfig {
        rounds: cfg.rounds,
        join_window_s: cfg.join_window_s,
        ..TourneyConfig::default()
    };

    // Joiners attach before the announcement so nobody misses it.
    let mut watchers = Vec::new();
    for i in 2..=cfg.bots {
        watchers.push((i, hub.attach().await));
    }

    let (relay, feed) = hub.attach().await;
    let host = tourney_driver("buddy1", tcfg.clone(), relay, feed, &store, &ledger, 90);
    let kind = cfg.kind;
    let mut tasks = vec![tokio::spawn(async move { host.host(kind).await })];

    for (i, (relay, mut feed)) in watchers {
        let tcfg = tcfg.clone();
        let store = store.clone();
        let ledger = ledger.clone();
        tasks.push(tokio::spawn(async move {
            let wait = Deadline::after_ms(10_000);
            let Some((session, kind, rounds, window)) = wait_for_start(&mut feed, &wait).await
            else {
                anyhow::bail!("no announcement on the relay");
            };
            let handle = format!("buddy{i}");
            let reaction = 80 + 60 * i as u64;
            let drv = tourney_driver(&handle, tcfg, relay, feed, &store, &ledger, reaction);
            drv.join(session, kind, rounds, window).await
        }));
    }

    let mut reports = Vec::new();
    for t in tasks {
        reports.push(t.await??);
    }
    Ok(reports)
}

async fn run_duel(cfg: &Config) -> anyhow::Result<Vec<DuelReport>> {
    let hub = LocalHub::new(HubConfig {
        channel_capacity: 256,
        dup_every: cfg.dup_every,
    });
    let store = ProfileStore::new(cfg.data_dir.join("profiles"));
    let ledger = Ledger::new(LedgerConfig {
        enabled: true,
        dir: cfg.data_dir.join("ledger"),
        channel_capacity: 256,
    })
    .await;

    let kind = match cfg.kind {
        GameKind::HighCard => DuelKind::HighCard,
        _ => DuelKind::QuickDraw,
    };

    // The target is on the relay before the challenge goes out.
    let (relay, feed) = hub.attach().await;
    let mut target = duel_driver("buddy2", relay, feed, &store, &ledger, 140);
    let answered = tokio::spawn(async move {
        let wait = Deadline::after_ms(10_000);
        let Some((challenger, kind, wager, nonce)) = target.await_challenge(&wait).await else {
            anyhow::bail!("no challenge arrived");
        };
        target.handle_challenge(challenger, kind, wager, nonce).await
    });

    let (relay, feed) = hub.attach().await;
    let mut challenger = duel_driver("buddy1", relay, feed, &store, &ledger, 90);
    let own = challenger.challenge("buddy2", kind, cfg.wager).await?;
    let theirs = answered.await??;
    Ok(vec![own, theirs])
}

fn tourney_driver(
    handle: &str,
    tcfg: TourneyConfig,
    relay: RelayHandle,
    feed: RelayFeed,
    store: &ProfileStore,
    ledger: &Ledger,
    reaction_ms: u64,
) -> TourneyDriver {
    let (n_tx, n_rx) = mpsc::channel(64);
    let (a_tx, a_rx) = mpsc::channel(8);
    bot_presenter(handle.to_string(), n_rx, a_tx, reaction_ms);
    TourneyDriver::new(
        PlayerRef::new(handle, handle),
        tcfg,
        relay,
        feed,
        n_tx,
        a_rx,
        store.clone(),
        ledger.clone(),
    )
}

fn duel_driver(
    handle: &str,
    relay: RelayHandle,
    feed: RelayFeed,
    store: &ProfileStore,
    ledger: &Ledger,
    reaction_ms: u64,
) -> DuelDriver {
    let (n_tx, n_rx) = mpsc::channel(64);
    let (a_tx, a_rx) = mpsc::channel(8);
    bot_presenter(handle.to_string(), n_rx, a_tx, reaction_ms);
    DuelDriver::new(
        PlayerRef::new(handle, handle),
        DuelConfig::default(),
        relay,
        feed,
        n_tx,
        a_rx,
        store.clone(),
        ledger.clone(),
    )
}

/// Stand-in for a human at the terminal: answers every prompt after a
/// fixed reaction time and narrates the rest to the log.
fn bot_presenter(
    handle: String,
    mut notices: mpsc::Receiver<Notice>,
    answers: mpsc::Sender<Answer>,
    reaction_ms: u64,
) {
    tokio::spawn(async move {
        while let Some(n) = notices.recv().await {
            match n {
                Notice::RoundPrompt { round, rounds, .. } => {
                    info!(bot = %handle, round, rounds, "answering round");
                    let _ = answers
                        .send(Answer::Round {
                            elapsed_ms: reaction_ms,
                        })
                        .await;
                }
                Notice::DuelAsked {
                    challenger, wager, ..
                } => {
                    info!(bot = %handle, challenger = %challenger.handle, wager, "accepting duel");
                    let _ = answers.send(Answer::Duel { accept: true }).await;
                }
                Notice::DuelPrompt { .. } => {
                    let _ = answers
                        .send(Answer::Round {
                            elapsed_ms: reaction_ms,
                        })
                        .await;
                }
                Notice::RoundScored {
                    round, score, total, ..
                } => {
                    info!(bot = %handle, round, score, total, "round scored");
                }
                Notice::SessionEnded { standings, .. } => {
                    let podium = standings
                        .iter()
                        .map(|p| format!("{}:{}", p.handle, p.score))
                        .collect::<Vec<_>>()
                        .join(" ");
                    info!(bot = %handle, podium = %podium, "session over");
                }
                Notice::SessionCancelled { reason, .. } => {
                    warn!(bot = %handle, reason = %reason, "session cancelled");
                }
                _ => {}
            }
        }
    });
}

/// Content authority stand-in. Tracks who joined each session and deals
/// everyone a hand on request; a repeated request for the same round is
/// answered with the exact same hands.
fn dealer(relay: RelayHandle, mut feed: RelayFeed, seed: u64) {
    tokio::spawn(async move {
        let mut kinds: HashMap<SessionId, GameKind> = HashMap::new();
        let mut rosters: HashMap<SessionId, Vec<String>> = HashMap::new();
        let mut dealt: HashMap<(SessionId, u32), Vec<RoundEntry>> = HashMap::new();
        while let Some(env) = feed.recv().await {
            match env.event {
                RelayEvent::SessionStart { session, kind, .. } => {
                    kinds.insert(session, kind);
                }
                RelayEvent::SessionJoin { session, player } => {
                    let roster = rosters.entry(session).or_default();
                    if !roster.iter().any(|h| h == &player.handle) {
                        roster.push(player.handle);
                    }
                }
                RelayEvent::RoundRequest { session, round } => {
                    let Some(kind) = kinds.get(&session).copied() else {
                        continue;
                    };
                    let Some(roster) = rosters.get(&session) else {
                        continue;
                    };
                    let hands = dealt
                        .entry((session, round))
                        .or_insert_with(|| {
                            let mut rng = Rng64::from_seed(
                                seed ^ session.short() ^ ((round as u64) << 17),
                            );
                            roster
                                .iter()
                                .map(|h| RoundEntry {
                                    handle: h.clone(),
                                    hand: deal_hand(kind, &mut rng),
                                })
                                .collect()
                        })
                        .clone();
                    relay.publish(&Envelope::new(RelayEvent::RoundContent {
                        session,
                        round,
                        hands,
                    }));
                    info!(session = %session, round, "hands dealt");
                }
                _ => {}
            }
        }
    });
}

async fn wait_for_start(
    feed: &mut RelayFeed,
    deadline: &Deadline,
) -> Option<(SessionId, GameKind, u32, u64)> {
    loop {
        tokio::select! {
            _ = deadline.sleep() => return None,
            ev = feed.recv() => {
                let env = ev?;
                if let RelayEvent::SessionStart { session, kind, rounds, join_window_s } = env.event {
                    return Some((session, kind, rounds, join_window_s));
                }
            }
        }
    }
}
