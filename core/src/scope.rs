//! Destination scope carried on every message
//!
//! A scope is a subset of `{node, beehive}`. `node` selects the on-node
//! distribution point, `beehive` selects the upstream aggregation tier.
//! Transports that carry a single routing key use `all` for both.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single destination tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeTag {
    /// On-node redistribution
    Node,
    /// Upstream aggregation tier
    Beehive,
}

impl ScopeTag {
    /// Wire name of the tag
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeTag::Node => "node",
            ScopeTag::Beehive => "beehive",
        }
    }
}

impl fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeTag {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(ScopeTag::Node),
            "beehive" => Ok(ScopeTag::Beehive),
            other => Err(UnknownScope(other.to_string())),
        }
    }
}

/// Error for a scope name outside the allowed set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scope {0:?}")]
pub struct UnknownScope(pub String);

/// Set of destination tags
///
/// The empty scope is legal: the message is processed but delivered nowhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    node: bool,
    beehive: bool,
}

impl Scope {
    /// No destinations
    pub const NONE: Scope = Scope {
        node: false,
        beehive: false,
    };
    /// Local sink only
    pub const NODE: Scope = Scope {
        node: true,
        beehive: false,
    };
    /// Upstream sink only
    pub const BEEHIVE: Scope = Scope {
        node: false,
        beehive: true,
    };
    /// Both sinks
    pub const ALL: Scope = Scope {
        node: true,
        beehive: true,
    };

    /// Parse a transport routing key: `node`, `beehive` or `all`
    pub fn from_routing_key(key: &str) -> Result<Self, UnknownScope> {
        match key {
            "all" => Ok(Scope::ALL),
            other => other.parse::<ScopeTag>().map(Scope::from),
        }
    }

    /// Add a tag to the set
    pub fn insert(&mut self, tag: ScopeTag) {
        match tag {
            ScopeTag::Node => self.node = true,
            ScopeTag::Beehive => self.beehive = true,
        }
    }

    /// Check membership
    pub fn contains(&self, tag: ScopeTag) -> bool {
        match tag {
            ScopeTag::Node => self.node,
            ScopeTag::Beehive => self.beehive,
        }
    }

    /// True when the message goes nowhere
    pub fn is_empty(&self) -> bool {
        !self.node && !self.beehive
    }

    /// Iterate tags in fixed order (node first)
    pub fn iter(&self) -> impl Iterator<Item = ScopeTag> + '_ {
        [ScopeTag::Node, ScopeTag::Beehive]
            .into_iter()
            .filter(|tag| self.contains(*tag))
    }
}

impl From<ScopeTag> for Scope {
    fn from(tag: ScopeTag) -> Self {
        let mut scope = Scope::NONE;
        scope.insert(tag);
        scope
    }
}

impl FromIterator<ScopeTag> for Scope {
    fn from_iter<I: IntoIterator<Item = ScopeTag>>(iter: I) -> Self {
        let mut scope = Scope::NONE;
        for tag in iter {
            scope.insert(tag);
        }
        scope
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, tag) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(tag.as_str())?;
        }
        f.write_str("]")
    }
}
