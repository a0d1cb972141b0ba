use serde::{Deserialize, Serialize};

/// Tier of the memory hierarchy. Ordered from rawest to most condensed.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordLevel {
    Turn,
    Leaf,
    Bindle,
}

impl RecordLevel {
    pub const ALL: [RecordLevel; 3] = [Self::Turn, Self::Leaf, Self::Bindle];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Turn => "turn",
            Self::Leaf => "leaf",
            Self::Bindle => "bindle",
        }
    }

    /// Level whose records roll up into this one.
    pub fn source_level(&self) -> Option<RecordLevel> {
        match self {
            Self::Turn => None,
            Self::Leaf => Some(Self::Turn),
            Self::Bindle => Some(Self::Leaf),
        }
    }

    /// Level this one rolls up into.
    pub fn parent_level(&self) -> Option<RecordLevel> {
        match self {
            Self::Turn => Some(Self::Leaf),
            Self::Leaf => Some(Self::Bindle),
            Self::Bindle => None,
        }
    }

    pub fn is_summary(&self) -> bool {
        !matches!(self, Self::Turn)
    }
}

impl std::fmt::Display for RecordLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "turn" => Ok(Self::Turn),
            "leaf" => Ok(Self::Leaf),
            "bindle" => Ok(Self::Bindle),
            other => Err(format!("unknown record level: {other}")),
        }
    }
}

/// Per-level values, used for counts and token totals in snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerLevel<T> {
    pub turn: T,
    pub leaf: T,
    pub bindle: T,
}

impl<T> PerLevel<T> {
    pub fn get(&self, level: RecordLevel) -> &T {
        match level {
            RecordLevel::Turn => &self.turn,
            RecordLevel::Leaf => &self.leaf,
            RecordLevel::Bindle => &self.bindle,
        }
    }

    pub fn get_mut(&mut self, level: RecordLevel) -> &mut T {
        match level {
            RecordLevel::Turn => &mut self.turn,
            RecordLevel::Leaf => &mut self.leaf,
            RecordLevel::Bindle => &mut self.bindle,
        }
    }
}
