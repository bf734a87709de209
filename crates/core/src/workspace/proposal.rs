//! # Proposals
//!
//! Closed set of candidate workspace updates. Agents hand back raw JSON;
//! anything that does not decode into one of the six variants is rejected
//! here, at the boundary.

use serde::{Deserialize, Serialize};

use crate::error::ProposalError;

/// Variant-specific payload of a proposal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProposalKind {
    Hypothesis,
    Decision {
        #[serde(default, alias = "isFinal")]
        is_final: bool,
    },
    Focus,
    ToolResult {
        key: String,
        #[serde(default)]
        value: serde_json::Value,
    },
    Challenge {
        /// Agent being challenged
        to: String,
        #[serde(default, alias = "targetHypothesis")]
        target_hypothesis: Option<String>,
    },
    Response {
        /// Challenger being answered, if the responder names one
        #[serde(default)]
        to: Option<String>,
        #[serde(default, alias = "targetHypothesis")]
        target_hypothesis: Option<String>,
    },
}

impl ProposalKind {
    /// Wire name of the variant
    pub fn label(&self) -> &'static str {
        match self {
            Self::Hypothesis => "hypothesis",
            Self::Decision { .. } => "decision",
            Self::Focus => "focus",
            Self::ToolResult { .. } => "tool_result",
            Self::Challenge { .. } => "challenge",
            Self::Response { .. } => "response",
        }
    }
}

/// A candidate update submitted by one agent in one round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    /// Registered name of the proposing agent
    #[serde(default)]
    pub source: String,
    pub content: String,
    /// Self-reported confidence in [0, 1]
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(flatten)]
    pub kind: ProposalKind,
}

impl Proposal {
    /// Decode and validate a raw agent result.
    ///
    /// `source` always becomes `agent`, whatever the payload claims.
    pub fn from_value(value: serde_json::Value, agent: &str) -> Result<Self, ProposalError> {
        let mut proposal: Proposal = serde_json::from_value(value)?;
        proposal.source = agent.to_string();
        proposal.validate()?;
        Ok(proposal)
    }

    /// Check field constraints the type system does not express
    pub fn validate(&self) -> Result<(), ProposalError> {
        if let Some(c) = self.confidence {
            if !c.is_finite() || !(0.0..=1.0).contains(&c) {
                return Err(ProposalError::Invalid(format!("confidence {} outside [0, 1]", c)));
            }
        }
        match &self.kind {
            ProposalKind::ToolResult { key, .. } if key.trim().is_empty() => {
                Err(ProposalError::Invalid("tool_result without key".to_string()))
            }
            ProposalKind::Challenge { to, .. } if to.trim().is_empty() => {
                Err(ProposalError::Invalid("challenge without target agent".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Whether this is a decision marked final
    pub fn is_final_decision(&self) -> bool {
        matches!(self.kind, ProposalKind::Decision { is_final: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_each_variant() {
        let cases = vec![
            (json!({"type": "hypothesis", "content": "h"}), "hypothesis"),
            (
                json!({"type": "decision", "content": "d", "isFinal": true}),
                "decision",
            ),
            (json!({"type": "focus", "content": "f"}), "focus"),
            (
                json!({"type": "tool_result", "content": "t", "key": "k", "value": {"ok": true}}),
                "tool_result",
            ),
            (
                json!({"type": "challenge", "content": "c", "to": "forge", "targetHypothesis": "h1"}),
                "challenge",
            ),
            (
                json!({"type": "response", "content": "r", "to": "scout"}),
                "response",
            ),
        ];

        for (value, label) in cases {
            let proposal = Proposal::from_value(value, "agent").unwrap();
            assert_eq!(proposal.kind.label(), label);
            assert_eq!(proposal.source, "agent");
        }
    }

    #[test]
    fn test_final_flag_and_target_aliases() {
        let p = Proposal::from_value(
            json!({"type": "decision", "content": "ship", "isFinal": true, "confidence": 0.9}),
            "sage",
        )
        .unwrap();
        assert!(p.is_final_decision());
        assert_eq!(p.confidence, Some(0.9));

        let p = Proposal::from_value(
            json!({"type": "challenge", "content": "why?", "to": "forge", "target_hypothesis": "h2"}),
            "scout",
        )
        .unwrap();
        assert_eq!(
            p.kind,
            ProposalKind::Challenge {
                to: "forge".to_string(),
                target_hypothesis: Some("h2".to_string())
            }
        );
    }

    #[test]
    fn test_source_cannot_be_spoofed() {
        let p = Proposal::from_value(
            json!({"type": "hypothesis", "content": "h", "source": "someone_else"}),
            "forge",
        )
        .unwrap();
        assert_eq!(p.source, "forge");
    }

    #[test]
    fn test_rejects_untyped_and_unknown() {
        let err = Proposal::from_value(json!({"content": "no type"}), "a").unwrap_err();
        assert_eq!(err.label(), "malformed");

        let err = Proposal::from_value(json!({"type": "vote", "content": "x"}), "a").unwrap_err();
        assert_eq!(err.label(), "malformed");

        let err = Proposal::from_value(json!("just a string"), "a").unwrap_err();
        assert_eq!(err.label(), "malformed");
    }

    #[test]
    fn test_rejects_invalid_fields() {
        let err = Proposal::from_value(
            json!({"type": "hypothesis", "content": "h", "confidence": 1.5}),
            "a",
        )
        .unwrap_err();
        assert_eq!(err.label(), "invalid");

        let err = Proposal::from_value(
            json!({"type": "tool_result", "content": "t", "key": "  "}),
            "a",
        )
        .unwrap_err();
        assert_eq!(err.label(), "invalid");

        let err =
            Proposal::from_value(json!({"type": "challenge", "content": "c", "to": ""}), "a")
                .unwrap_err();
        assert_eq!(err.label(), "invalid");
    }
}
