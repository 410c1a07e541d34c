//! End-of-tournament reward math. Pure and deterministic: standings in,
//! per-player outcomes out, same input always the same output.

use serde::Serialize;

use crate::registry::Participant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bundle {
    pub gold: u64,
    pub xp: u64,
    pub reputation: u64,
}

/// Everyone who finishes gets this, rank aside.
pub const PARTICIPATION: Bundle = Bundle {
    gold: 5,
    xp: 10,
    reputation: 1,
};

const RANK_BONUS: [(Bundle, &str); 3] = [
    (
        Bundle {
            gold: 100,
            xp: 150,
            reputation: 25,
        },
        "champion",
    ),
    (
        Bundle {
            gold: 50,
            xp: 75,
            reputation: 10,
        },
        "runner-up",
    ),
    (
        Bundle {
            gold: 25,
            xp: 40,
            reputation: 5,
        },
        "bronze",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardOutcome {
    pub handle: String,
    pub rank: u32,
    pub score: u64,
    pub gold: u64,
    pub xp: u64,
    pub reputation: u64,
    pub title: Option<&'static str>,
}

/// Compute every finisher's reward from final standings (already sorted,
/// rank 1 first). Base cut scales with score, top three stack a bonus,
/// and everyone gets the participation bundle.
pub fn compute_rewards(standings: &[Participant]) -> Vec<RewardOutcome> {
    standings
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut gold = p.score / 50 + PARTICIPATION.gold;
            let mut xp = p.score / 100 + PARTICIPATION.xp;
            let mut reputation = p.score / 200 + PARTICIPATION.reputation;
            let mut title = None;
            if let Some((bonus, t)) = RANK_BONUS.get(i) {
                gold += bonus.gold;
                xp += bonus.xp;
                reputation += bonus.reputation;
                title = Some(*t);
            }
            RewardOutcome {
                handle: p.handle.clone(),
                rank: (i + 1) as u32,
                score: p.score,
                gold,
                xp,
                reputation,
                title,
            }
        })
        .collect()
}

pub fn own_reward(standings: &[Participant], handle: &str) -> Option<RewardOutcome> {
    let h = crate::registry::normalize_handle(handle);
    compute_rewards(standings).into_iter().find(|o| o.handle == h)
}
