//! Agent roles bound to a session

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role an agent plays within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Primary,
    Secondary,
    Auxiliary,
}

impl AgentRole {
    /// Every role, in initialization order
    pub const ALL: [AgentRole; 3] = [AgentRole::Primary, AgentRole::Secondary, AgentRole::Auxiliary];

    /// Primary and secondary agents may take part in a handoff
    pub fn is_orchestration_capable(self) -> bool {
        matches!(self, AgentRole::Primary | AgentRole::Secondary)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Primary => "primary",
            AgentRole::Secondary => "secondary",
            AgentRole::Auxiliary => "auxiliary",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(AgentRole::Primary),
            "secondary" => Ok(AgentRole::Secondary),
            "auxiliary" => Ok(AgentRole::Auxiliary),
            other => Err(format!("unknown agent role: {other}")),
        }
    }
}
