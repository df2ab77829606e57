//! Capability vocabulary shared by the host policy and extension manifests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A host resource an extension may be granted access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Database access.
    Database,
    /// Shared cache access.
    Cache,
    /// Route and middleware registration.
    Router,
    /// Read access to host configuration values.
    #[serde(alias = "config")]
    Configuration,
    /// Sandboxed filesystem access.
    Filesystem,
    /// Outbound network access.
    Network,
    /// Spawning host processes.
    #[serde(alias = "exec")]
    ProcessExecution,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 7] = [
        Self::Database,
        Self::Cache,
        Self::Router,
        Self::Configuration,
        Self::Filesystem,
        Self::Network,
        Self::ProcessExecution,
    ];

    /// Returns the manifest key for this capability.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Cache => "cache",
            Self::Router => "router",
            Self::Configuration => "config",
            Self::Filesystem => "filesystem",
            Self::Network => "network",
            Self::ProcessExecution => "exec",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" => Ok(Self::Database),
            "cache" => Ok(Self::Cache),
            "router" => Ok(Self::Router),
            "config" | "configuration" => Ok(Self::Configuration),
            "filesystem" => Ok(Self::Filesystem),
            "network" => Ok(Self::Network),
            "exec" | "process_execution" => Ok(Self::ProcessExecution),
            other => Err(format!("unknown capability '{other}'")),
        }
    }
}

/// A compact set of [`Capability`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Inserts a capability.
    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    /// Returns a copy with `capability` added.
    pub fn with(mut self, capability: Capability) -> Self {
        self.insert(capability);
        self
    }

    /// Returns whether the set contains `capability`.
    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Returns the capabilities present in both sets.
    pub fn intersection(&self, other: &CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0 & other.0)
    }

    /// Returns whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates the contained capabilities in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Self::empty();
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|c| c.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
