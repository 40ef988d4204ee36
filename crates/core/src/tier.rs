//! User capability tiers
//!
//! Each user sits on one tier; capability flags are derived once per tier
//! and gate which task-dispatch tools the owner exposes.

use serde::{Deserialize, Serialize};

/// Ordered capability levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Plus,
    Pro,
}

impl Default for Tier {
    fn default() -> Self {
        Self::Free
    }
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Plus => "plus",
            Self::Pro => "pro",
        }
    }
}

/// Where a task can be dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTarget {
    /// The user's own terminal supervisor
    LocalTerminal,
    /// A provisioned cloud desktop sandbox
    CloudDesktop,
}

impl DispatchTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalTerminal => "local_terminal",
            Self::CloudDesktop => "cloud_desktop",
        }
    }
}

/// Capability flags derived from a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub web_search: bool,
    pub cloud_desktop: bool,
    pub memory: bool,
}

impl Capabilities {
    /// Derive the flags for a tier. Derived once per tier change, never per
    /// request.
    pub fn for_tier(tier: Tier) -> Self {
        Self {
            web_search: tier >= Tier::Plus,
            cloud_desktop: tier >= Tier::Pro,
            memory: tier >= Tier::Plus,
        }
    }

    /// Whether a dispatch target is exposed to this user.
    /// The local terminal is always available; cloud desktops are gated.
    pub fn allows(&self, target: DispatchTarget) -> bool {
        match target {
            DispatchTarget::LocalTerminal => true,
            DispatchTarget::CloudDesktop => self.cloud_desktop,
        }
    }
}
