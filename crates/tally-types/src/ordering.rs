use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Which global ordering a listing is drawn from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingKey {
    /// Newest first, by creation time.
    #[default]
    Time,
    /// Hottest first, by Score Index value.
    Score,
}

impl OrderingKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Score => "score",
        }
    }
}

impl FromStr for OrderingKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "time" => Ok(Self::Time),
            "score" => Ok(Self::Score),
            _ => Err(TypeError::InvalidOrdering(s.to_string())),
        }
    }
}

impl fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
