use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Random 128-bit session identifier, carried on the wire as 32 hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u128);

impl SessionId {
    pub const HEX_LEN: usize = 32;

    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(b: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(b))
    }

    pub fn to_hex(self) -> String {
        format!("{:032x}", self.0)
    }

    pub fn parse_hex(s: &str) -> Option<Self> {
        if s.len() != Self::HEX_LEN {
            return None;
        }
        u128::from_str_radix(s, 16).ok().map(Self)
    }

    pub fn short(self) -> u64 {
        // Good enough for logs/UI: XOR high/low halves.
        (self.0 as u64) ^ ((self.0 >> 64) as u64)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SessionId::parse_hex(&s).ok_or_else(|| serde::de::Error::custom("bad session id"))
    }
}

/// Tournament lifecycle. Transitions only move forward; `Ended` and
/// `Cancelled` are absorbing. Enforcement lives with the session holder,
/// the wire only names the phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Joining,
    Active,
    Ended,
    Cancelled,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Joining => "joining",
            Phase::Active => "active",
            Phase::Ended => "ended",
            Phase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Ended | Phase::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    HighCard,
    QuickDraw,
    DiceRun,
}

impl GameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GameKind::HighCard => "high_card",
            GameKind::QuickDraw => "quick_draw",
            GameKind::DiceRun => "dice_run",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high_card" => Some(GameKind::HighCard),
            "quick_draw" => Some(GameKind::QuickDraw),
            "dice_run" => Some(GameKind::DiceRun),
            _ => None,
        }
    }

    /// Bytes a dealt hand carries for this kind.
    pub fn hand_len(self) -> usize {
        match self {
            GameKind::HighCard => 1,
            GameKind::QuickDraw => 2,
            GameKind::DiceRun => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelKind {
    QuickDraw,
    HighCard,
}

impl DuelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DuelKind::QuickDraw => "quick_draw",
            DuelKind::HighCard => "high_card",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quick_draw" => Some(DuelKind::QuickDraw),
            "high_card" => Some(DuelKind::HighCard),
            _ => None,
        }
    }
}
