//! `parlor`: client core for shared play over a dumb relay.
//!
//! Everything here drives one local player's view of the card parlor:
//! tournaments, head-to-head duels, the purse, and the audit trail. The
//! relay only broadcasts, and it may duplicate or reorder anything, so
//! every driver in this crate treats inbound events as idempotent merges
//! and bounds every wait with a deadline. The UI sits behind a pair of
//! channels and can never stall a session by being slow.

pub mod clock;
pub mod duel;
pub mod ledger;
pub mod notice;
pub mod profile;
pub mod registry;
pub mod relay;
pub mod rewards;
pub mod rounds;
pub mod tournament;
