//! Autonomous system identifiers and the paths built from them.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};
use thiserror::Error as ThisError;

/// Identifies one routing domain. In a deployment every router uses its
/// listening port as its identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AsId(pub u16);

impl AsId {
    /// The identifier as a port number.
    pub fn port(self) -> u16 {
        self.0
    }
}

impl Display for AsId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AsId {
    type Err = AsPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse()
            .map(AsId)
            .or_else(|_| Err(AsPathError::InvalidId(s.to_string())))
    }
}

/// The identifiers an advertisement traversed, origin first. The router that
/// most recently re-advertised the path is last.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AsPath(Vec<AsId>);

impl AsPath {
    /// Creates a path from identifiers, origin first. Returns `None` for an
    /// empty list.
    pub fn new(ids: Vec<AsId>) -> Option<Self> {
        if ids.is_empty() {
            None
        } else {
            Some(Self(ids))
        }
    }

    /// The identifier the advertisement started from.
    pub fn origin(&self) -> AsId {
        self.0[0]
    }

    /// The identifier before the last one: the neighbor a re-advertised path
    /// was learned from.
    pub fn previous_hop(&self) -> Option<AsId> {
        self.0.len().checked_sub(2).map(|i| self.0[i])
    }

    /// The number of identifiers in the path.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: AsId) -> bool {
        self.0.contains(&id)
    }

    /// A copy of the path with `id` appended.
    pub fn extended(&self, id: AsId) -> Self {
        let mut ids = self.0.clone();
        ids.push(id);
        Self(ids)
    }

    pub fn ids(&self) -> &[AsId] {
        &self.0
    }
}

impl Display for AsPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

impl FromStr for AsPath {
    type Err = AsPathError;

    /// Parses space separated identifiers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ids = s
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<Vec<AsId>, _>>()?;
        Self::new(ids).ok_or(AsPathError::Empty)
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum AsPathError {
    #[error("An AS path needs at least one identifier")]
    Empty,
    #[error("'{0}' is not a valid AS identifier")]
    InvalidId(String),
}
