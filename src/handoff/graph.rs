//! Transfer graph
//!
//! Directed edges between agent roles, validated once at startup and shared
//! read-only afterwards.

use crate::agent::AgentRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Directed, described permission to transfer control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRule {
    pub from: AgentRole,
    pub to: AgentRole,
    /// When the `from` agent should hand over
    #[serde(default)]
    pub trigger: String,
}

impl HandoffRule {
    pub fn new<S: Into<String>>(from: AgentRole, to: AgentRole, trigger: S) -> Self {
        Self {
            from,
            to,
            trigger: trigger.into(),
        }
    }
}

/// Transfer graph validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Role {0} cannot take part in a handoff")]
    NotOrchestrationCapable(AgentRole),

    #[error("Rule {0} -> {0} transfers a role to itself")]
    SelfTransfer(AgentRole),

    #[error("Rule {from} -> {to} is declared more than once")]
    DuplicateRule { from: AgentRole, to: AgentRole },

    #[error("Role {0} has no outgoing transfer and is not absorbing")]
    StrandedRole(AgentRole),
}

/// Validated, immutable set of handoff rules with one start role
#[derive(Debug, Clone, PartialEq)]
pub struct TransferGraph {
    start: AgentRole,
    rules: Vec<HandoffRule>,
    absorbing: BTreeSet<AgentRole>,
}

impl TransferGraph {
    /// Build and validate a graph
    pub fn new(
        start: AgentRole,
        rules: Vec<HandoffRule>,
        absorbing: impl IntoIterator<Item = AgentRole>,
    ) -> Result<Self, GraphError> {
        let graph = Self {
            start,
            rules,
            absorbing: absorbing.into_iter().collect(),
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Check the graph invariants.
    ///
    /// Every participating role must be orchestration-capable, no rule may
    /// loop on itself or repeat, and every participating role that is not
    /// absorbing must have at least one outgoing rule.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            for role in [rule.from, rule.to] {
                if !role.is_orchestration_capable() {
                    return Err(GraphError::NotOrchestrationCapable(role));
                }
            }
            if rule.from == rule.to {
                return Err(GraphError::SelfTransfer(rule.from));
            }
            if !seen.insert((rule.from, rule.to)) {
                return Err(GraphError::DuplicateRule {
                    from: rule.from,
                    to: rule.to,
                });
            }
        }

        for role in self.participants() {
            if !role.is_orchestration_capable() {
                return Err(GraphError::NotOrchestrationCapable(role));
            }
            if !self.absorbing.contains(&role) && self.rules_from(role).next().is_none() {
                return Err(GraphError::StrandedRole(role));
            }
        }
        Ok(())
    }

    pub fn start(&self) -> AgentRole {
        self.start
    }

    pub fn is_absorbing(&self, role: AgentRole) -> bool {
        self.absorbing.contains(&role)
    }

    /// Start role plus every role named by a rule
    pub fn participants(&self) -> BTreeSet<AgentRole> {
        std::iter::once(self.start)
            .chain(self.rules.iter().flat_map(|rule| [rule.from, rule.to]))
            .collect()
    }

    pub fn rules_from(&self, role: AgentRole) -> impl Iterator<Item = &HandoffRule> + '_ {
        self.rules.iter().filter(move |rule| rule.from == role)
    }

    /// True when the graph declares the edge `from -> to`
    pub fn permits(&self, from: AgentRole, to: AgentRole) -> bool {
        self.rules_from(from).any(|rule| rule.to == to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentRole::{Auxiliary, Primary, Secondary};

    fn tutor_quiz() -> Vec<HandoffRule> {
        vec![
            HandoffRule::new(Primary, Secondary, "user requests quizzes"),
            HandoffRule::new(Secondary, Primary, "explanations after quiz"),
        ]
    }

    #[test]
    fn test_two_way_graph_is_valid() {
        let graph = TransferGraph::new(Primary, tutor_quiz(), []).unwrap();
        assert_eq!(graph.start(), Primary);
        assert!(graph.permits(Primary, Secondary));
        assert!(graph.permits(Secondary, Primary));
        assert_eq!(graph.rules_from(Primary).count(), 1);
    }

    #[test]
    fn test_stranded_role_is_rejected() {
        let rules = vec![HandoffRule::new(Primary, Secondary, "")];
        assert_eq!(
            TransferGraph::new(Primary, rules, []),
            Err(GraphError::StrandedRole(Secondary))
        );
    }

    #[test]
    fn test_absorbing_role_may_have_no_exit() {
        let rules = vec![HandoffRule::new(Primary, Secondary, "")];
        let graph = TransferGraph::new(Primary, rules, [Secondary]).unwrap();
        assert!(graph.is_absorbing(Secondary));
        assert!(!graph.permits(Secondary, Primary));
    }

    #[test]
    fn test_start_without_rules_must_be_absorbing() {
        assert_eq!(
            TransferGraph::new(Primary, vec![], []),
            Err(GraphError::StrandedRole(Primary))
        );
        assert!(TransferGraph::new(Primary, vec![], [Primary]).is_ok());
    }

    #[test]
    fn test_auxiliary_cannot_participate() {
        let rules = vec![
            HandoffRule::new(Primary, Auxiliary, ""),
            HandoffRule::new(Auxiliary, Primary, ""),
        ];
        assert_eq!(
            TransferGraph::new(Primary, rules, []),
            Err(GraphError::NotOrchestrationCapable(Auxiliary))
        );
        assert_eq!(
            TransferGraph::new(Auxiliary, vec![], [Auxiliary]),
            Err(GraphError::NotOrchestrationCapable(Auxiliary))
        );
    }

    #[test]
    fn test_self_and_duplicate_rules_rejected() {
        let rules = vec![HandoffRule::new(Primary, Primary, "")];
        assert_eq!(
            TransferGraph::new(Primary, rules, []),
            Err(GraphError::SelfTransfer(Primary))
        );

        let mut rules = tutor_quiz();
        rules.push(HandoffRule::new(Primary, Secondary, "again"));
        assert_eq!(
            TransferGraph::new(Primary, rules, []),
            Err(GraphError::DuplicateRule {
                from: Primary,
                to: Secondary
            })
        );
    }

    #[test]
    fn test_rule_deserializes_from_toml() {
        let rule: HandoffRule =
            toml::from_str("from = \"primary\"\nto = \"secondary\"\ntrigger = \"quiz\"").unwrap();
        assert_eq!(rule, HandoffRule::new(Primary, Secondary, "quiz"));
    }
}
