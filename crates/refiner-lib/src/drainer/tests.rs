//! Drain protocol tests
//!
//! These tests verify:
//! - Cordon and uncordon against current node state
//! - Throttled evictions are retried until accepted
//! - Failed evictions and timeouts roll the node back

use super::*;
use crate::models::{NodeRecord, PodIdentity, Resources};
use crate::policy::{DrainerPolicy, PolicyStore};
use crate::store::EntityStore;
use crate::testing::{Call, MockClusterApi};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

fn fast_timing() -> ProtocolTiming {
    ProtocolTiming {
        throttle_retry: Duration::from_millis(10),
        deletion_poll: Duration::from_millis(5),
    }
}

fn node(name: &str) -> NodeRecord {
    NodeRecord::new(name, Resources::new(4000, 8_000_000_000), Utc::now())
}

fn pod(name: &str) -> PodIdentity {
    PodIdentity::new("default", name).with_uid(format!("uid-{}", name))
}

async fn drainer_with(
    api: MockClusterApi,
    policy: DrainerPolicy,
) -> (CordonDrainer<MockClusterApi>, Arc<MockClusterApi>, EntityStore) {
    let api = Arc::new(api);
    let store = EntityStore::new();
    store.on_node_added(node("n1")).await;
    let drainer = CordonDrainer::new(Arc::clone(&api), store.clone(), PolicyStore::new(policy))
        .with_timing(fast_timing());
    (drainer, api, store)
}

async fn drainer(api: MockClusterApi) -> (CordonDrainer<MockClusterApi>, Arc<MockClusterApi>, EntityStore) {
    drainer_with(api, DrainerPolicy::default()).await
}

mod cordon_tests {
    use super::*;

    #[tokio::test]
    async fn test_cordon_patches_and_updates_store() {
        let (drainer, api, store) = drainer(MockClusterApi::new().with_node(node("n1"))).await;

        tokio_test::assert_ok!(drainer.cordon("n1").await);

        assert_eq!(api.patches(), vec![("n1".to_string(), true)]);
        assert!(store.snapshot().await[0].unschedulable);
        assert!(store.drain_state().await.last_scale_down.is_some());
    }

    #[tokio::test]
    async fn test_cordon_already_unschedulable_is_noop() {
        let api = MockClusterApi::new().with_node(node("n1").with_unschedulable(true));
        let (drainer, api, _) = drainer(api).await;

        drainer.cordon("n1").await.unwrap();

        assert!(api.patches().is_empty());
        assert_eq!(api.calls(), vec![Call::GetNode("n1".to_string())]);
    }

    #[tokio::test]
    async fn test_cordon_then_uncordon_restores_state() {
        let (drainer, api, store) = drainer(MockClusterApi::new().with_node(node("n1"))).await;

        drainer.cordon("n1").await.unwrap();
        drainer.uncordon("n1").await.unwrap();

        assert!(!api.node("n1").unwrap().unschedulable);
        assert!(!store.snapshot().await[0].unschedulable);
        assert_eq!(
            api.patches(),
            vec![("n1".to_string(), true), ("n1".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_uncordon_schedulable_node_is_noop() {
        let (drainer, api, _) = drainer(MockClusterApi::new().with_node(node("n1"))).await;
        drainer.uncordon("n1").await.unwrap();
        assert!(api.patches().is_empty());
    }

    #[tokio::test]
    async fn test_cordon_missing_node_is_error() {
        let (drainer, _, store) = drainer(MockClusterApi::new()).await;

        let err = tokio_test::assert_err!(drainer.cordon("ghost").await);
        assert!(matches!(
            err,
            DrainError::Cordon { ref node, ref source } if node == "ghost" && source.is_not_found()
        ));
        // The attempt still counts towards the cool-down
        assert!(store.drain_state().await.last_scale_down.is_some());
    }
}

mod drain_tests {
    use super::*;

    #[tokio::test]
    async fn test_throttled_eviction_is_retried() {
        let api = MockClusterApi::new()
            .with_node(node("n1"))
            .with_pod("n1", pod("a"))
            .with_pod("n1", pod("b"))
            .with_pod("n1", pod("c"))
            .with_eviction_errors(
                "default/b",
                vec![ApiError::Throttled("disruption budget".into())],
            );
        let (drainer, api, _) = drainer(api).await;

        let report = drainer.scale_down("n1").await;

        assert_eq!(report.outcome, DrainOutcome::Drained { evicted: 3 });
        assert_eq!(report.final_phase(), Some(DrainPhase::Drained));
        assert_eq!(api.evictions("default/b"), 2);
        assert_eq!(api.evictions("default/a"), 1);
        assert!(!api.has_pod("default/c"));
        // Drained nodes stay cordoned
        assert_eq!(api.patches(), vec![("n1".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_eviction_error_rolls_back() {
        let api = MockClusterApi::new()
            .with_node(node("n1"))
            .with_pod("n1", pod("a"))
            .with_eviction_errors("default/a", vec![ApiError::Api("internal error".into())]);
        let (drainer, api, store) = drainer(api).await;

        let report = drainer.scale_down("n1").await;

        assert!(matches!(
            report.outcome,
            DrainOutcome::RolledBack {
                cause: DrainError::Eviction { .. }
            }
        ));
        assert_eq!(
            report.phases,
            vec![
                DrainPhase::Schedulable,
                DrainPhase::Cordoned,
                DrainPhase::Draining,
                DrainPhase::DrainFailed,
                DrainPhase::Uncordoned,
            ]
        );
        assert_eq!(
            api.patches(),
            vec![("n1".to_string(), true), ("n1".to_string(), false)]
        );
        assert!(!store.snapshot().await[0].unschedulable);
    }

    #[tokio::test]
    async fn test_not_found_eviction_counts_as_success() {
        let api = MockClusterApi::new()
            .with_node(node("n1"))
            .with_pod("n1", pod("a"))
            .with_eviction_errors("default/a", vec![ApiError::not_found("pod default/a")]);
        let (drainer, _, _) = drainer(api).await;

        assert_eq!(drainer.drain("n1").await, Ok(1));
    }

    #[tokio::test]
    async fn test_zero_pods_drains_immediately() {
        let (drainer, _, _) = drainer(MockClusterApi::new().with_node(node("n1"))).await;
        let report = drainer.scale_down("n1").await;
        assert_eq!(report.outcome, DrainOutcome::Drained { evicted: 0 });
    }

    #[tokio::test]
    async fn test_deadline_rolls_back() {
        let api = MockClusterApi::new()
            .with_node(node("n1"))
            .with_pod("n1", pod("a"))
            .with_stuck_pod("default/a");
        let policy = DrainerPolicy {
            max_grace_period: Duration::ZERO,
            eviction_headroom: Duration::from_millis(100),
            ..Default::default()
        };
        let (drainer, api, _) = drainer_with(api, policy).await;

        let report = drainer.scale_down("n1").await;

        match report.outcome {
            DrainOutcome::RolledBack { cause } => assert!(matches!(
                cause,
                DrainError::Timeout { .. } | DrainError::DeletionTimeout { .. }
            )),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!api.node("n1").unwrap().unschedulable);
    }

    #[tokio::test]
    async fn test_failed_uncordon_leaves_node_cordoned() {
        let api = MockClusterApi::new()
            .with_node(node("n1"))
            .with_pod("n1", pod("a"))
            .with_eviction_errors("default/a", vec![ApiError::Api("internal error".into())])
            .with_uncordon_error(ApiError::Api("conflict".into()));
        let (drainer, api, store) = drainer(api).await;

        let report = drainer.scale_down("n1").await;

        match report.outcome {
            DrainOutcome::RollbackFailed { ref cause, ref rollback } => {
                assert!(matches!(cause, DrainError::Eviction { .. }));
                assert!(matches!(rollback, DrainError::Uncordon { ref node, .. } if node == "n1"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(report.outcome.label(), "rollback_failed");
        assert_eq!(report.final_phase(), Some(DrainPhase::DrainFailed));
        assert!(api.node("n1").unwrap().unschedulable);
        assert!(store.snapshot().await[0].unschedulable);
    }

    #[tokio::test]
    async fn test_replaced_pod_counts_as_deleted() {
        let api = MockClusterApi::new()
            .with_node(node("n1"))
            .with_pod("n1", pod("a"))
            .with_replacement_pod("default/a", "uid-a-2");
        let (drainer, api, _) = drainer(api).await;

        let report = drainer.scale_down("n1").await;

        assert_eq!(report.outcome, DrainOutcome::Drained { evicted: 1 });
        assert!(api.has_pod("default/a"));
        assert!(api.calls().contains(&Call::GetPod("default/a".into())));
    }

    #[tokio::test]
    async fn test_abort_stops_throttled_retries() {
        let api = MockClusterApi::new()
            .with_node(node("n1"))
            .with_pod("n1", pod("a"))
            .with_pod("n1", pod("b"))
            .with_eviction_errors("default/a", vec![ApiError::Api("internal error".into())])
            .with_eviction_errors(
                "default/b",
                (0..1000)
                    .map(|_| ApiError::Throttled("disruption budget".into()))
                    .collect(),
            );
        let (drainer, api, _) = drainer(api).await;

        let report = drainer.scale_down("n1").await;
        assert!(matches!(
            report.outcome,
            DrainOutcome::RolledBack {
                cause: DrainError::Eviction { .. }
            }
        ));

        // Give the throttled worker time to observe the abort
        tokio::time::sleep(Duration::from_millis(50)).await;
        let attempts = api.evictions("default/b");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(api.evictions("default/b"), attempts);
        assert!(attempts < 10, "throttled pod evicted {} times", attempts);
    }

    #[tokio::test]
    async fn test_list_failure_rolls_back() {
        let api = MockClusterApi::new()
            .with_node(node("n1"))
            .with_list_error(ApiError::Api("forbidden".into()));
        let (drainer, _, _) = drainer(api).await;

        let report = drainer.scale_down("n1").await;
        assert!(matches!(
            report.outcome,
            DrainOutcome::RolledBack {
                cause: DrainError::ListPods { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_cordon_failure_skips_drain() {
        let api = MockClusterApi::new()
            .with_node(node("n1"))
            .with_pod("n1", pod("a"))
            .with_patch_error(ApiError::Api("conflict".into()));
        let (drainer, api, _) = drainer(api).await;

        let report = drainer.scale_down("n1").await;

        assert_eq!(report.outcome.label(), "cordon_failed");
        assert_eq!(report.phases, vec![DrainPhase::Schedulable]);
        assert_eq!(api.evictions("default/a"), 0);
    }

    #[tokio::test]
    async fn test_grace_period_is_capped() {
        let api = MockClusterApi::new()
            .with_node(node("n1"))
            .with_pod("n1", pod("short").with_grace_period(30))
            .with_pod("n1", pod("long").with_grace_period(3600))
            .with_pod("n1", pod("unset"));
        let (drainer, api, _) = drainer(api).await;

        drainer.drain("n1").await.unwrap();

        let calls = api.calls();
        assert!(calls.contains(&Call::Evict("default/short".into(), 30)));
        assert!(calls.contains(&Call::Evict("default/long".into(), 480)));
        assert!(calls.contains(&Call::Evict("default/unset".into(), 480)));
    }
}

#[test]
fn test_effective_grace_period() {
    let max = Duration::from_secs(480);
    assert_eq!(effective_grace_period(None, max), 480);
    assert_eq!(effective_grace_period(Some(10), max), 10);
    assert_eq!(effective_grace_period(Some(900), max), 480);
}
