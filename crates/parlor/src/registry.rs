//! Session roster: who is in, and what their announced totals are.
//!
//! The relay delivers joins and scores at-least-once and unordered, so
//! everything here is an idempotent merge. Scores are cumulative totals
//! owned by each player's client; we keep the max we have seen, which
//! absorbs duplicates and stale reorders of a monotone sequence.

use parlorproto::event::ScoredPlayer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub handle: String,
    pub name: String,
    pub score: u64,
    pub gold_earned: u64,
}

pub fn normalize_handle(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// Insertion-ordered participant set keyed by normalized handle.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    members: Vec<Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, handle: &str) -> Option<&Participant> {
        let h = normalize_handle(handle);
        self.members.iter().find(|p| p.handle == h)
    }

    /// Register a player. Re-joins leave the existing entry's score
    /// untouched. Returns true only when the player was new.
    pub fn upsert(&mut self, handle: &str, name: &str) -> bool {
        let h = normalize_handle(handle);
        if h.is_empty() {
            return false;
        }
        if let Some(p) = self.members.iter_mut().find(|p| p.handle == h) {
            // A score can arrive before its join; that entry was filed
            // under a placeholder name. Fix it up here.
            if p.name == p.handle && !name.trim().is_empty() {
                p.name = name.trim().to_string();
            }
            return false;
        }
        let name = name.trim();
        self.members.push(Participant {
            handle: h.clone(),
            name: if name.is_empty() { h } else { name.to_string() },
            score: 0,
            gold_earned: 0,
        });
        true
    }

    /// Merge a cumulative total. Unknown handles are admitted with a
    /// placeholder name so a reordered score-before-join still lands.
    pub fn apply_score(&mut self, handle: &str, cumulative: u64) {
        let h = normalize_handle(handle);
        if h.is_empty() {
            return;
        }
        match self.members.iter_mut().find(|p| p.handle == h) {
            Some(p) => p.score = p.score.max(cumulative),
            None => self.members.push(Participant {
                handle: h.clone(),
                name: h,
                score: cumulative,
                gold_earned: 0,
            }),
        }
    }

    pub fn set_gold_earned(&mut self, handle: &str, gold: u64) {
        let h = normalize_handle(handle);
        if let Some(p) = self.members.iter_mut().find(|p| p.handle == h) {
            p.gold_earned = gold;
        }
    }

    /// Merge a full-state snapshot. Same idempotent rules as the
    /// individual events it summarizes.
    pub fn merge_snapshot(&mut self, players: &[ScoredPlayer]) {
        for sp in players {
            self.upsert(&sp.handle, &sp.name);
            self.apply_score(&sp.handle, sp.score);
        }
    }

    pub fn members(&self) -> &[Participant] {
        &self.members
    }

    /// Standings: descending by score, ties in join order. Stable sort,
    /// so repeated calls over the same state agree.
    pub fn leaderboard(&self) -> Vec<Participant> {
        let mut v = self.members.clone();
        v.sort_by(|a, b| b.score.cmp(&a.score));
        v
    }

    pub fn as_scored(&self) -> Vec<ScoredPlayer> {
        self.members
            .iter()
            .map(|p| ScoredPlayer {
                handle: p.handle.clone(),
                name: p.name.clone(),
                score: p.score,
            })
            .collect()
    }
}
