//! `parlorproto`: the relay wire contract shared by parlor clients.
//!
//! Every payload published to the relay is one JSON [`event::Envelope`]:
//! a version byte plus a `type`-tagged event. The relay itself is a dumb
//! at-least-once pub/sub pipe; it neither orders nor dedups, so every
//! event here is written to be safe to receive twice and out of order.

pub mod event;
pub mod session;

#[derive(Debug, Clone)]
pub enum ProtoError {
    BadJson(String),
    UnknownVersion(u8),
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::BadJson(s) => write!(f, "bad event json: {s}"),
            ProtoError::UnknownVersion(v) => write!(f, "unknown envelope version: {v}"),
        }
    }
}

impl std::error::Error for ProtoError {}
