//! # Challenge Effectiveness
//!
//! Tracks challenges issued and answered within a session, how long
//! answers took, and whether answers show evidence of something actually
//! having been run. Evidence detection is a replaceable pattern policy.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pattern sources for empirical-attempt detection (case-insensitive)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmpiricalPatterns {
    /// Any match marks a response as an empirical attempt
    pub attempt: Vec<String>,
    /// Any match marks an attempt as successful...
    pub success: Vec<String>,
    /// ...unless one of these also matches
    pub failure: Vec<String>,
}

impl Default for EmpiricalPatterns {
    fn default() -> Self {
        Self {
            attempt: vec![
                r"\b(ran|executed|tested|tried|attempted|benchmarked|measured|reproduced)\b"
                    .to_string(),
                r"\b(result|output|exit code|stdout|stderr|error)\s*:".to_string(),
            ],
            success: vec![
                r"\b(passed|passes|succeeded|success|works|worked)\b".to_string(),
                r"\bexit code\s*:\s*0\b".to_string(),
            ],
            failure: vec![
                r"\b(failed|fails|failure|panicked|exception|crashed)\b".to_string(),
                r"\berror\s*:".to_string(),
            ],
        }
    }
}

/// Compiled empirical-attempt policy
#[derive(Debug, Clone)]
pub struct EmpiricalPolicy {
    attempt: Vec<Regex>,
    success: Vec<Regex>,
    failure: Vec<Regex>,
}

impl Default for EmpiricalPolicy {
    fn default() -> Self {
        // Built-in patterns are fixed and known to compile
        Self::from_patterns(&EmpiricalPatterns::default()).unwrap_or(Self {
            attempt: Vec::new(),
            success: Vec::new(),
            failure: Vec::new(),
        })
    }
}

/// How a response text was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assessment {
    pub empirical: bool,
    pub successful: bool,
}

impl EmpiricalPolicy {
    pub fn from_patterns(patterns: &EmpiricalPatterns) -> Result<Self> {
        Ok(Self {
            attempt: compile_all(&patterns.attempt)?,
            success: compile_all(&patterns.success)?,
            failure: compile_all(&patterns.failure)?,
        })
    }

    pub fn assess(&self, text: &str) -> Assessment {
        let empirical = self.attempt.iter().any(|re| re.is_match(text));
        let successful = empirical
            && self.success.iter().any(|re| re.is_match(text))
            && !self.failure.iter().any(|re| re.is_match(text));
        Assessment {
            empirical,
            successful,
        }
    }
}

fn compile_all(sources: &[String]) -> Result<Vec<Regex>> {
    sources
        .iter()
        .map(|src| {
            RegexBuilder::new(src)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("Invalid empirical pattern: {}", src))
        })
        .collect()
}

#[derive(Debug, Clone)]
struct IssuedChallenge {
    from: String,
    to: String,
    issued_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
}

/// An agent and how often it was challenged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengedAgent {
    pub agent: String,
    pub count: usize,
}

/// Summary of challenge effectiveness for a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChallengeReport {
    pub issued: usize,
    pub responded: usize,
    pub mean_response_ms: Option<f64>,
    pub empirical_attempts: usize,
    pub successful_attempts: usize,
    /// successful / empirical attempts (0 with no attempts)
    pub success_rate: f64,
    /// Most challenged first
    pub most_challenged: Vec<ChallengedAgent>,
}

/// Per-session challenge bookkeeping
#[derive(Debug, Clone, Default)]
pub struct ChallengeTracker {
    policy: EmpiricalPolicy,
    issued: Vec<IssuedChallenge>,
    empirical_attempts: usize,
    successful_attempts: usize,
}

impl ChallengeTracker {
    pub fn new(policy: EmpiricalPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn record_challenge(&mut self, from: &str, to: &str, at: DateTime<Utc>) {
        self.issued.push(IssuedChallenge {
            from: from.to_string(),
            to: to.to_string(),
            issued_at: at,
            responded_at: None,
        });
    }

    /// Record a winning response. `challenger` is set when it answered a
    /// specific open challenge.
    pub fn record_response(
        &mut self,
        responder: &str,
        challenger: Option<&str>,
        content: &str,
        at: DateTime<Utc>,
    ) -> Assessment {
        if let Some(challenger) = challenger {
            if let Some(open) = self
                .issued
                .iter_mut()
                .find(|c| c.responded_at.is_none() && c.to == responder && c.from == challenger)
            {
                open.responded_at = Some(at);
            }
        }

        let assessment = self.policy.assess(content);
        if assessment.empirical {
            self.empirical_attempts += 1;
        }
        if assessment.successful {
            self.successful_attempts += 1;
        }
        assessment
    }

    pub fn issued(&self) -> usize {
        self.issued.len()
    }

    pub fn empirical_attempts(&self) -> usize {
        self.empirical_attempts
    }

    pub fn report(&self) -> ChallengeReport {
        let latencies: Vec<f64> = self
            .issued
            .iter()
            .filter_map(|c| {
                c.responded_at
                    .map(|r| (r - c.issued_at).num_milliseconds().max(0) as f64)
            })
            .collect();
        let mean_response_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        };

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for c in &self.issued {
            *counts.entry(c.to.as_str()).or_insert(0) += 1;
        }
        let mut most_challenged: Vec<ChallengedAgent> = counts
            .into_iter()
            .map(|(agent, count)| ChallengedAgent {
                agent: agent.to_string(),
                count,
            })
            .collect();
        most_challenged.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.agent.cmp(&b.agent)));

        ChallengeReport {
            issued: self.issued.len(),
            responded: latencies.len(),
            mean_response_ms,
            empirical_attempts: self.empirical_attempts,
            successful_attempts: self.successful_attempts,
            success_rate: if self.empirical_attempts == 0 {
                0.0
            } else {
                self.successful_attempts as f64 / self.empirical_attempts as f64
            },
            most_challenged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_policy_classification() {
        let policy = EmpiricalPolicy::default();

        let a = policy.assess("I ran the suite and all 12 tests passed");
        assert!(a.empirical && a.successful);

        let a = policy.assess("Tested it locally. Error: connection refused");
        assert!(a.empirical && !a.successful);

        let a = policy.assess("I believe this is correct");
        assert!(!a.empirical && !a.successful);
    }

    #[test]
    fn test_custom_patterns_replace_defaults() {
        let policy = EmpiricalPolicy::from_patterns(&EmpiricalPatterns {
            attempt: vec!["evidence".to_string()],
            success: vec!["green".to_string()],
            failure: vec![],
        })
        .unwrap();
        assert!(policy.assess("EVIDENCE is green").successful);
        assert!(!policy.assess("I ran it").empirical);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = EmpiricalPolicy::from_patterns(&EmpiricalPatterns {
            attempt: vec!["(unclosed".to_string()],
            success: vec![],
            failure: vec![],
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_tracker_report() {
        let mut tracker = ChallengeTracker::new(EmpiricalPolicy::default());
        let t0 = Utc::now();
        tracker.record_challenge("scout", "forge", t0);
        tracker.record_challenge("scout", "forge", t0);
        tracker.record_challenge("forge", "sage", t0);

        tracker.record_response(
            "forge",
            Some("scout"),
            "ran cargo test, result: 40 passed",
            t0 + Duration::milliseconds(200),
        );
        tracker.record_response(
            "sage",
            Some("forge"),
            "tried it and it failed",
            t0 + Duration::milliseconds(400),
        );
        tracker.record_response("forge", None, "trust me", t0);

        let report = tracker.report();
        assert_eq!(report.issued, 3);
        assert_eq!(report.responded, 2);
        assert_eq!(report.mean_response_ms, Some(300.0));
        assert_eq!(report.empirical_attempts, 2);
        assert_eq!(report.successful_attempts, 1);
        assert_eq!(report.success_rate, 0.5);
        assert_eq!(
            report.most_challenged,
            vec![
                ChallengedAgent {
                    agent: "forge".to_string(),
                    count: 2
                },
                ChallengedAgent {
                    agent: "sage".to_string(),
                    count: 1
                },
            ]
        );
    }
}
