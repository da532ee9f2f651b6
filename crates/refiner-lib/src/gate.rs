//! Drain decision gate
//!
//! Six independent conditions, evaluated in order; the first failing one
//! becomes the denial reason.

use crate::cluster::ClusterSnapshot;
use crate::policy::DrainerPolicy;
use crate::store::DrainState;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Authorize,
    Deny(DenyReason),
}

impl GateDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, GateDecision::Authorize)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DenyReason {
    Disabled,
    InsufficientExcess { excess: f64, threshold: f64 },
    RecentNodeAddition { remaining: Duration },
    ScaleDownCoolDown { remaining: Duration },
    TooFewNodes { nodes: usize, minimum: usize },
    TooFewNonTaintedNodes { nodes: usize, minimum: usize },
}

impl DenyReason {
    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            DenyReason::Disabled => "disabled",
            DenyReason::InsufficientExcess { .. } => "insufficient_excess",
            DenyReason::RecentNodeAddition { .. } => "recent_node_addition",
            DenyReason::ScaleDownCoolDown { .. } => "scale_down_cool_down",
            DenyReason::TooFewNodes { .. } => "too_few_nodes",
            DenyReason::TooFewNonTaintedNodes { .. } => "too_few_non_tainted_nodes",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Disabled => write!(f, "drainer is disabled based on the provided configuration"),
            DenyReason::InsufficientExcess { excess, threshold } => write!(
                f,
                "nothing to scale down, cluster has {:.2} excess nodes (threshold {:.2})",
                excess, threshold
            ),
            DenyReason::RecentNodeAddition { remaining } => write!(
                f,
                "waiting after the latest node addition, {} minutes remaining",
                remaining.as_secs() / 60
            ),
            DenyReason::ScaleDownCoolDown { remaining } => write!(
                f,
                "waiting between node drains, {} seconds remaining",
                remaining.as_secs()
            ),
            DenyReason::TooFewNodes { nodes, minimum } => write!(
                f,
                "cluster has {} nodes, fewer than the minimum of {}",
                nodes, minimum
            ),
            DenyReason::TooFewNonTaintedNodes { nodes, minimum } => write!(
                f,
                "cluster has {} non tainted nodes, fewer than the minimum of {}",
                nodes, minimum
            ),
        }
    }
}

/// Time left until `since + window`, or None once the window has passed
fn remaining(since: Option<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) -> Option<Duration> {
    let since = since?;
    // A timestamp in the future counts as zero elapsed time
    let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
    window.checked_sub(elapsed).filter(|r| !r.is_zero())
}

/// Decide whether a drain attempt may start now
pub fn evaluate(
    snapshot: &ClusterSnapshot,
    policy: &DrainerPolicy,
    state: &DrainState,
    now: DateTime<Utc>,
) -> GateDecision {
    if !policy.enabled {
        return GateDecision::Deny(DenyReason::Disabled);
    }

    if snapshot.excess_nodes < policy.excess_nodes_threshold {
        return GateDecision::Deny(DenyReason::InsufficientExcess {
            excess: snapshot.excess_nodes,
            threshold: policy.excess_nodes_threshold,
        });
    }

    if let Some(remaining) = remaining(state.last_node_addition, policy.min_time_since_addition, now) {
        return GateDecision::Deny(DenyReason::RecentNodeAddition { remaining });
    }

    if let Some(remaining) = remaining(state.last_scale_down, policy.time_gap, now) {
        return GateDecision::Deny(DenyReason::ScaleDownCoolDown { remaining });
    }

    if snapshot.node_count < policy.minimum_nodes {
        return GateDecision::Deny(DenyReason::TooFewNodes {
            nodes: snapshot.node_count,
            minimum: policy.minimum_nodes,
        });
    }

    if snapshot.non_tainted_node_count < policy.minimum_non_tainted_nodes {
        return GateDecision::Deny(DenyReason::TooFewNonTaintedNodes {
            nodes: snapshot.non_tainted_node_count,
            minimum: policy.minimum_non_tainted_nodes,
        });
    }

    GateDecision::Authorize
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn policy() -> DrainerPolicy {
        DrainerPolicy {
            enabled: true,
            excess_nodes_threshold: 2.0,
            minimum_nodes: 3,
            ..Default::default()
        }
    }

    fn snapshot(excess: f64, nodes: usize, non_tainted: usize) -> ClusterSnapshot {
        ClusterSnapshot {
            excess_nodes: excess,
            node_count: nodes,
            non_tainted_node_count: non_tainted,
            ..Default::default()
        }
    }

    fn settled(now: DateTime<Utc>) -> DrainState {
        DrainState {
            last_node_addition: Some(now - ChronoDuration::hours(3)),
            last_scale_down: Some(now - ChronoDuration::hours(1)),
        }
    }

    #[test]
    fn test_insufficient_excess_denied() {
        let now = Utc::now();
        let decision = evaluate(&snapshot(1.0, 5, 5), &policy(), &settled(now), now);
        assert_eq!(
            decision,
            GateDecision::Deny(DenyReason::InsufficientExcess {
                excess: 1.0,
                threshold: 2.0
            })
        );
    }

    #[test]
    fn test_minimum_nodes_denied() {
        let now = Utc::now();
        let decision = evaluate(&snapshot(3.0, 2, 2), &policy(), &settled(now), now);
        assert_eq!(
            decision,
            GateDecision::Deny(DenyReason::TooFewNodes {
                nodes: 2,
                minimum: 3
            })
        );
    }

    #[test]
    fn test_all_conditions_pass() {
        let now = Utc::now();
        let decision = evaluate(&snapshot(3.0, 5, 5), &policy(), &settled(now), now);
        assert!(decision.is_authorized());
    }

    #[test]
    fn test_fresh_state_authorizes() {
        let decision = evaluate(&snapshot(3.0, 5, 5), &policy(), &DrainState::default(), Utc::now());
        assert!(decision.is_authorized());
    }

    #[test]
    fn test_disabled_short_circuits() {
        let now = Utc::now();
        let disabled = DrainerPolicy {
            enabled: false,
            ..policy()
        };
        let decision = evaluate(&snapshot(0.0, 0, 0), &disabled, &settled(now), now);
        assert_eq!(decision, GateDecision::Deny(DenyReason::Disabled));
    }

    #[test]
    fn test_recent_addition_denied() {
        let now = Utc::now();
        let state = DrainState {
            last_node_addition: Some(now - ChronoDuration::minutes(20)),
            last_scale_down: None,
        };
        match evaluate(&snapshot(3.0, 5, 5), &policy(), &state, now) {
            GateDecision::Deny(DenyReason::RecentNodeAddition { remaining }) => {
                assert_eq!(remaining.as_secs() / 60, 40);
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_future_addition_treated_as_just_added() {
        let now = Utc::now();
        let state = DrainState {
            last_node_addition: Some(now + ChronoDuration::minutes(5)),
            last_scale_down: None,
        };
        let decision = evaluate(&snapshot(3.0, 5, 5), &policy(), &state, now);
        assert_eq!(decision.clone(), decision);
        assert!(matches!(
            decision,
            GateDecision::Deny(DenyReason::RecentNodeAddition { .. })
        ));
    }

    #[test]
    fn test_scale_down_cool_down_denied() {
        let now = Utc::now();
        let state = DrainState {
            last_node_addition: None,
            last_scale_down: Some(now - ChronoDuration::minutes(4)),
        };
        let decision = evaluate(&snapshot(3.0, 5, 5), &policy(), &state, now);
        assert!(matches!(
            decision,
            GateDecision::Deny(DenyReason::ScaleDownCoolDown { .. })
        ));
    }

    #[test]
    fn test_non_tainted_minimum_denied() {
        let now = Utc::now();
        let decision = evaluate(&snapshot(3.0, 5, 2), &policy(), &settled(now), now);
        assert_eq!(
            decision,
            GateDecision::Deny(DenyReason::TooFewNonTaintedNodes {
                nodes: 2,
                minimum: 3
            })
        );
    }

    #[test]
    fn test_deny_labels() {
        assert_eq!(DenyReason::Disabled.label(), "disabled");
        assert!(DenyReason::TooFewNodes { nodes: 1, minimum: 3 }
            .to_string()
            .contains("minimum of 3"));
    }
}
