use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Direction of a single user's vote on a post.
///
/// `Neutral` means "no active vote": either the user never voted or the vote
/// was retracted. Records are never deleted, only moved back to `Neutral`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum VoteDirection {
    Down,
    #[default]
    Neutral,
    Up,
}

impl VoteDirection {
    /// Numeric value: -1, 0 or +1.
    pub const fn value(self) -> i64 {
        match self {
            Self::Down => -1,
            Self::Neutral => 0,
            Self::Up => 1,
        }
    }

    pub fn from_value(value: i64) -> Result<Self, TypeError> {
        match value {
            -1 => Ok(Self::Down),
            0 => Ok(Self::Neutral),
            1 => Ok(Self::Up),
            other => Err(TypeError::InvalidDirection(other)),
        }
    }

    /// `true` for up and down votes.
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Neutral)
    }
}

impl TryFrom<i64> for VoteDirection {
    type Error = TypeError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<VoteDirection> for i64 {
    fn from(direction: VoteDirection) -> Self {
        direction.value()
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Down => "down",
            Self::Neutral => "neutral",
            Self::Up => "up",
        };
        write!(f, "{s}")
    }
}
