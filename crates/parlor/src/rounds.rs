//! Round content sync and per-round scoring.
//!
//! Round content is dealt by the room authority and broadcast; clients
//! cache it by `(session, round)` and keep the first copy they see, so
//! retransmissions and duplicate deliveries are free.

use std::collections::HashMap;

use parlorproto::event::RoundEntry;
use parlorproto::session::{GameKind, SessionId};

use crate::registry::normalize_handle;

/// How long a client waits for `round_content` after asking for it.
pub const ROUND_CONTENT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Default)]
pub struct RoundSync {
    cache: HashMap<(SessionId, u32), Vec<RoundEntry>>,
}

impl RoundSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, session: SessionId, round: u32) -> Option<&[RoundEntry]> {
        self.cache.get(&(session, round)).map(|v| v.as_slice())
    }

    /// First copy wins; a duplicate is dropped and reported as such.
    pub fn insert(&mut self, session: SessionId, round: u32, hands: Vec<RoundEntry>) -> bool {
        match self.cache.entry((session, round)) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(hands);
                true
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rng64 {
    state: u64,
}

impl Rng64 {
    pub fn from_seed(seed: u64) -> Self {
        let mut s = seed;
        if s == 0 {
            s = 0x9e3779b97f4a7c15;
        }
        Self { state: s }
    }

    pub fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    pub fn roll_range(&mut self, lo: u64, hi_inclusive: u64) -> u64 {
        debug_assert!(lo <= hi_inclusive);
        let span = hi_inclusive - lo + 1;
        lo + self.next_u64() % span
    }
}

/// Deal one hand for `kind`. This is the authority side of the contract;
/// clients only ever validate and score what they were dealt.
pub fn deal_hand(kind: GameKind, rng: &mut Rng64) -> Vec<u8> {
    match kind {
        // One card 0..=51, rank is card % 13 (2 low, ace high).
        GameKind::HighCard => vec![rng.roll_range(0, 51) as u8],
        // Go-delay in 10ms units, big-endian u16: 500ms..=3000ms.
        GameKind::QuickDraw => {
            let units = rng.roll_range(50, 300) as u16;
            units.to_be_bytes().to_vec()
        }
        // Three dice, 1..=6 each.
        GameKind::DiceRun => (0..3).map(|_| rng.roll_range(1, 6) as u8).collect(),
    }
}

pub fn valid_hand(kind: GameKind, hand: &[u8]) -> bool {
    if hand.len() != kind.hand_len() {
        return false;
    }
    match kind {
        GameKind::HighCard => hand[0] <= 51,
        GameKind::QuickDraw => true,
        GameKind::DiceRun => hand.iter().all(|&d| (1..=6).contains(&d)),
    }
}

/// Find `handle`'s dealt hand in a round's content.
pub fn hand_for<'a>(hands: &'a [RoundEntry], handle: &str) -> Option<&'a [u8]> {
    let h = normalize_handle(handle);
    hands
        .iter()
        .find(|e| normalize_handle(&e.handle) == h)
        .map(|e| e.hand.as_slice())
}

/// Roster members the dealt content skipped. They score zero for the
/// round; that is a gap to warn about, not an error.
pub fn missing_entries(hands: &[RoundEntry], roster_handles: &[String]) -> Vec<String> {
    roster_handles
        .iter()
        .filter(|h| hand_for(hands, h).is_none())
        .cloned()
        .collect()
}

/// Score one played round. `elapsed_ms` is how long the local player
/// took to answer, `None` when the input window lapsed unanswered.
/// A malformed hand scores zero.
pub fn score_round(kind: GameKind, hand: &[u8], elapsed_ms: Option<u64>, dwell_ms: u64) -> u64 {
    if !valid_hand(kind, hand) {
        return 0;
    }
    match kind {
        // Scored from the card alone; a slow reveal still counts.
        GameKind::HighCard => {
            let rank = (hand[0] % 13) as u64;
            (2 + rank) * 5
        }
        // Faster is better, but even dead-slow keeps a point.
        GameKind::QuickDraw => {
            let reaction = elapsed_ms.unwrap_or(dwell_ms).min(dwell_ms);
            (dwell_ms.saturating_sub(reaction) / 20).max(1)
        }
        // First input inside the window banks the dice; no input, no score.
        GameKind::DiceRun => match elapsed_ms {
            Some(e) if e < dwell_ms => hand.iter().map(|&d| d as u64).sum::<u64>() * 3,
            _ => 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keeps_first_copy() {
        let mut sync = RoundSync::new();
        let s = SessionId(1);
        let first = vec![RoundEntry {
            handle: "ada".into(),
            hand: vec![12],
        }];
        let second = vec![RoundEntry {
            handle: "ada".into(),
            hand: vec![0],
        }];
        assert!(sync.insert(s, 1, first.clone()));
        assert!(!sync.insert(s, 1, second));
        assert_eq!(sync.cached(s, 1), Some(first.as_slice()));
        assert!(sync.cached(s, 2).is_none());
        assert!(sync.cached(SessionId(2), 1).is_none());
    }

    #[test]
    fn dealt_hands_are_valid() {
        let mut rng = Rng64::from_seed(0xFEED);
        for kind in [GameKind::HighCard, GameKind::QuickDraw, GameKind::DiceRun] {
            for _ in 0..50 {
                let hand = deal_hand(kind, &mut rng);
                assert!(valid_hand(kind, &hand), "{kind:?} dealt {hand:?}");
            }
        }
    }

    #[test]
    fn dealing_is_deterministic_per_seed() {
        let mut a = Rng64::from_seed(99);
        let mut b = Rng64::from_seed(99);
        for _ in 0..10 {
            assert_eq!(
                deal_hand(GameKind::DiceRun, &mut a),
                deal_hand(GameKind::DiceRun, &mut b)
            );
        }
    }

    #[test]
    fn hand_for_matches_normalized_handle() {
        let hands = vec![
            RoundEntry {
                handle: "Ada".into(),
                hand: vec![40],
            },
            RoundEntry {
                handle: "bix".into(),
                hand: vec![3],
            },
        ];
        assert_eq!(hand_for(&hands, " ada "), Some(&[40u8][..]));
        assert_eq!(hand_for(&hands, "zed"), None);
        let roster = vec!["ada".to_string(), "zed".to_string()];
        assert_eq!(missing_entries(&hands, &roster), vec!["zed".to_string()]);
    }

    #[test]
    fn high_card_scores_rank_even_when_slow() {
        // Card 51 is the ace of the last suit: rank 12.
        assert_eq!(score_round(GameKind::HighCard, &[51], None, 4000), 70);
        // Card 13 wraps to rank 0.
        assert_eq!(score_round(GameKind::HighCard, &[13], Some(10), 4000), 10);
    }

    #[test]
    fn quick_draw_rewards_speed_with_a_floor() {
        let dwell = 4000;
        let fast = score_round(GameKind::QuickDraw, &[0, 50], Some(200), dwell);
        let slow = score_round(GameKind::QuickDraw, &[0, 50], Some(3900), dwell);
        let never = score_round(GameKind::QuickDraw, &[0, 50], None, dwell);
        assert_eq!(fast, 190);
        assert_eq!(slow, 5);
        assert_eq!(never, 1);
        assert!(fast > slow && slow > never);
    }

    #[test]
    fn dice_run_needs_an_answer_inside_the_window() {
        let hand = [2, 3, 6];
        assert_eq!(score_round(GameKind::DiceRun, &hand, Some(100), 4000), 33);
        assert_eq!(score_round(GameKind::DiceRun, &hand, Some(4000), 4000), 0);
        assert_eq!(score_round(GameKind::DiceRun, &hand, None, 4000), 0);
    }

    #[test]
    fn malformed_hands_score_zero() {
        assert_eq!(score_round(GameKind::HighCard, &[99], Some(1), 4000), 0);
        assert_eq!(score_round(GameKind::HighCard, &[], Some(1), 4000), 0);
        assert_eq!(score_round(GameKind::DiceRun, &[0, 3, 3], Some(1), 4000), 0);
        assert_eq!(score_round(GameKind::QuickDraw, &[5], Some(1), 4000), 0);
    }
}
