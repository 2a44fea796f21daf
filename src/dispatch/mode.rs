//! Agent modes
//!
//! A mode selects the pipeline for one message. Client strings are decoded
//! leniently: case is ignored, as are `-`, `_` and spaces, so
//! `"direct-primary"`, `"DirectPrimary"` and `"direct primary"` are the same
//! mode. Strings that still do not match fall back to the configured default.

use crate::agent::AgentRole;
use crate::observability::metrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Pipeline selected for a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AgentMode {
    /// Stream from the auxiliary agent
    #[default]
    DirectDefault,
    /// Stream from the primary agent
    DirectPrimary,
    /// Stream from the secondary agent
    DirectSecondary,
    /// Run the handoff protocol between primary and secondary
    HandoffOrchestration,
}

impl AgentMode {
    pub const ALL: [AgentMode; 4] = [
        AgentMode::DirectDefault,
        AgentMode::DirectPrimary,
        AgentMode::DirectSecondary,
        AgentMode::HandoffOrchestration,
    ];

    /// Decode a client-supplied mode, falling back to `default`
    pub fn resolve(raw: Option<&str>, default: AgentMode) -> AgentMode {
        let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
            return default;
        };

        raw.parse().unwrap_or_else(|_| {
            warn!(requested = raw, fallback = %default, "Unknown agent mode, using default");
            metrics().mode_fallback();
            default
        })
    }

    /// Role streamed by a direct mode; `None` for handoff
    pub fn target_role(self) -> Option<AgentRole> {
        match self {
            AgentMode::DirectDefault => Some(AgentRole::Auxiliary),
            AgentMode::DirectPrimary => Some(AgentRole::Primary),
            AgentMode::DirectSecondary => Some(AgentRole::Secondary),
            AgentMode::HandoffOrchestration => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentMode::DirectDefault => "direct-default",
            AgentMode::DirectPrimary => "direct-primary",
            AgentMode::DirectSecondary => "direct-secondary",
            AgentMode::HandoffOrchestration => "handoff-orchestration",
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for AgentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "directdefault" | "default" | "azureonly" => Ok(AgentMode::DirectDefault),
            "directprimary" | "primary" | "tutoronly" => Ok(AgentMode::DirectPrimary),
            "directsecondary" | "secondary" | "quizonly" => Ok(AgentMode::DirectSecondary),
            "handofforchestration" | "handoff" => Ok(AgentMode::HandoffOrchestration),
            _ => Err(format!("unknown agent mode: {s}")),
        }
    }
}

impl TryFrom<String> for AgentMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AgentMode> for String {
    fn from(mode: AgentMode) -> Self {
        mode.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_canonical_names_round_trip() {
        for mode in AgentMode::ALL {
            assert_eq!(mode.as_str().parse::<AgentMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_lenient_spellings() {
        assert_eq!(
            "HandoffOrchestration".parse::<AgentMode>().unwrap(),
            AgentMode::HandoffOrchestration
        );
        assert_eq!(
            "direct_secondary".parse::<AgentMode>().unwrap(),
            AgentMode::DirectSecondary
        );
        assert_eq!(
            "Direct Primary".parse::<AgentMode>().unwrap(),
            AgentMode::DirectPrimary
        );
        assert_eq!(
            "AzureOnly".parse::<AgentMode>().unwrap(),
            AgentMode::DirectDefault
        );
        assert_eq!(
            "QUIZONLY".parse::<AgentMode>().unwrap(),
            AgentMode::DirectSecondary
        );
    }

    #[test]
    fn test_target_roles() {
        assert_eq!(
            AgentMode::DirectDefault.target_role(),
            Some(AgentRole::Auxiliary)
        );
        assert_eq!(
            AgentMode::DirectPrimary.target_role(),
            Some(AgentRole::Primary)
        );
        assert_eq!(
            AgentMode::DirectSecondary.target_role(),
            Some(AgentRole::Secondary)
        );
        assert_eq!(AgentMode::HandoffOrchestration.target_role(), None);
    }

    #[test]
    fn test_resolve_falls_back() {
        assert_eq!(
            AgentMode::resolve(Some("nonsense"), AgentMode::DirectPrimary),
            AgentMode::DirectPrimary
        );
        assert_eq!(
            AgentMode::resolve(None, AgentMode::DirectSecondary),
            AgentMode::DirectSecondary
        );
        assert_eq!(
            AgentMode::resolve(Some("  "), AgentMode::DirectDefault),
            AgentMode::DirectDefault
        );
        assert_eq!(
            AgentMode::resolve(Some("handoff"), AgentMode::DirectDefault),
            AgentMode::HandoffOrchestration
        );
    }

    #[test]
    fn test_serde_uses_canonical_names() {
        assert_eq!(
            serde_json::to_string(&AgentMode::HandoffOrchestration).unwrap(),
            "\"handoff-orchestration\""
        );
        let mode: AgentMode = serde_json::from_str("\"TutorOnly\"").unwrap();
        assert_eq!(mode, AgentMode::DirectPrimary);
        assert!(serde_json::from_str::<AgentMode>("\"bogus\"").is_err());
    }

    proptest! {
        #[test]
        fn resolve_never_fails(raw in ".*", default_index in 0usize..4) {
            let default = AgentMode::ALL[default_index];
            let mode = AgentMode::resolve(Some(raw.as_str()), default);
            prop_assert!(AgentMode::ALL.contains(&mode));
            if raw.parse::<AgentMode>().is_err() {
                prop_assert_eq!(mode, default);
            }
        }

        #[test]
        fn separators_and_case_are_ignored(
            index in 0usize..4,
            upper in any::<bool>(),
            separator in prop::sample::select(vec!["", "-", "_", " "]),
        ) {
            let mode = AgentMode::ALL[index];
            let spelled = mode.as_str().replace('-', separator);
            let spelled = if upper { spelled.to_uppercase() } else { spelled };
            prop_assert_eq!(spelled.parse::<AgentMode>().unwrap(), mode);
        }
    }
}
