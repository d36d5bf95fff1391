//! Decision engine - merges local and shared counter verdicts into one
//! admit/deny outcome per request.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::{
    CountingMode, Decision, Dimension, FailurePolicy, Identity, LimiterSettings, RequestMetadata,
    resolve,
};
use crate::error::RateLimitError;
use crate::ports::{LocalVerdict, SharedCounter, WindowCounter};

/// One dimension's check: which axis, at what limit, over what window.
#[derive(Debug, Clone, Copy)]
pub struct DimensionPlan {
    pub dimension: Dimension,
    pub limit: u32,
    pub window: Duration,
}

/// Orchestrates the local window counter and, when configured, the
/// shared counter client. Owns no protocol-specific I/O; the host feeds
/// it [`RequestMetadata`] and interprets the [`Decision`].
pub struct DecisionEngine {
    local: Arc<dyn WindowCounter>,
    shared: Option<Arc<dyn SharedCounter>>,
    /// Fixed evaluation order; determines which limit is reported when
    /// several dimensions are exhausted at once.
    plans: Vec<DimensionPlan>,
    policy: FailurePolicy,
    mode: CountingMode,
    analytics: bool,
}

impl DecisionEngine {
    pub fn new(
        local: Arc<dyn WindowCounter>,
        shared: Option<Arc<dyn SharedCounter>>,
        plans: Vec<DimensionPlan>,
        policy: FailurePolicy,
        mode: CountingMode,
        analytics: bool,
    ) -> Self {
        Self {
            local,
            shared,
            plans,
            policy,
            mode,
            analytics,
        }
    }

    /// Build an engine checking the address dimension first, then the
    /// session dimension, both at the configured limit and window.
    pub fn from_settings(
        settings: &LimiterSettings,
        local: Arc<dyn WindowCounter>,
        shared: Option<Arc<dyn SharedCounter>>,
    ) -> Self {
        let window = settings.window();
        let plans = vec![
            DimensionPlan {
                dimension: Dimension::Address,
                limit: settings.limit,
                window,
            },
            DimensionPlan {
                dimension: Dimension::Session,
                limit: settings.limit,
                window,
            },
        ];
        Self::new(
            local,
            shared,
            plans,
            settings.failure_policy,
            settings.counting_mode(),
            settings.analytics_enabled,
        )
    }

    /// Evaluate one request.
    ///
    /// Dimensions are checked locally in plan order; the first local
    /// rejection short-circuits without consulting the shared backend.
    /// When every dimension passes locally and shared mode is active,
    /// each key is checked against the shared store and the verdicts are
    /// merged: `remaining = min(local, shared)`, `reset_at = max(local,
    /// shared)`, admission requires both. A shared rejection is written
    /// back into the local counter so this node converges toward the
    /// cross-node count between shared checks.
    pub async fn decide(&self, meta: &RequestMetadata) -> Result<Decision, RateLimitError> {
        let mint = self
            .plans
            .iter()
            .any(|plan| plan.dimension == Dimension::Session);
        let resolution = resolve(meta, mint)?;
        let minted_session_key = resolution.minted_session_key.clone();

        let mut checked: Vec<(DimensionPlan, Identity, LocalVerdict)> =
            Vec::with_capacity(self.plans.len());
        for plan in &self.plans {
            let Some(identity) = resolution.identity(plan.dimension) else {
                continue;
            };
            let verdict = self
                .local
                .check(&identity.cache_key(), plan.limit, plan.window)
                .await;
            if !verdict.admitted {
                let decision = Decision {
                    admitted: false,
                    limit: plan.limit,
                    remaining: verdict.remaining,
                    reset_at: verdict.reset_at,
                    failed_dimension: Some(plan.dimension),
                    minted_session_key: minted_session_key.clone(),
                };
                self.emit(&decision);
                return Ok(decision);
            }
            checked.push((*plan, identity.clone(), verdict));
        }

        // All dimensions admitted locally; report the most constrained one.
        let Some((tight_plan, _, tight_verdict)) =
            checked.iter().min_by_key(|(_, _, verdict)| verdict.remaining)
        else {
            return Err(RateLimitError::InvalidSettings(
                "no dimensions configured".into(),
            ));
        };
        let mut limit = tight_plan.limit;
        let mut remaining = tight_verdict.remaining;
        let mut reset_at = checked
            .iter()
            .map(|(_, _, verdict)| verdict.reset_at)
            .max()
            .unwrap_or(tight_verdict.reset_at);

        let mut admitted = true;
        let mut failed_dimension = None;

        if let Some(shared) = &self.shared {
            for (plan, identity, _) in &checked {
                let key = identity.cache_key();
                match shared
                    .increment_and_check(&key, plan.limit, plan.window, self.mode)
                    .await
                {
                    Ok(shared_verdict) => {
                        if shared_verdict.remaining < remaining {
                            remaining = shared_verdict.remaining;
                            limit = plan.limit;
                        }
                        if shared_verdict.reset_at > reset_at {
                            reset_at = shared_verdict.reset_at;
                        }
                        if !shared_verdict.success {
                            admitted = false;
                            if failed_dimension.is_none() {
                                failed_dimension = Some(plan.dimension);
                                limit = plan.limit;
                            }
                            self.local
                                .sync_remaining(
                                    &key,
                                    plan.limit,
                                    shared_verdict.remaining,
                                    shared_verdict.reset_at,
                                )
                                .await;
                        }
                    }
                    Err(err) => match self.policy {
                        FailurePolicy::FailOpen => {
                            warn!(key = %key, error = %err,
                                "shared counter unavailable, using local verdict");
                        }
                        FailurePolicy::FailClosed => {
                            warn!(key = %key, error = %err,
                                "shared counter unavailable, failing closed");
                            admitted = false;
                            if failed_dimension.is_none() {
                                failed_dimension = Some(plan.dimension);
                                limit = plan.limit;
                            }
                        }
                    },
                }
            }
        }

        let decision = Decision {
            admitted,
            limit,
            remaining,
            reset_at,
            failed_dimension,
            minted_session_key,
        };
        self.emit(&decision);
        Ok(decision)
    }

    fn emit(&self, decision: &Decision) {
        if self.analytics {
            tracing::info!(
                admitted = decision.admitted,
                limit = decision.limit,
                remaining = decision.remaining,
                reset = decision.reset_epoch_secs(),
                failed_dimension = decision.failed_dimension.map(|d| d.tag()),
                "rate limit decision"
            );
        } else if !decision.admitted {
            tracing::debug!(
                limit = decision.limit,
                failed_dimension = decision.failed_dimension.map(|d| d.tag()),
                "request rejected by rate limiter"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;

    use crate::ports::SharedVerdict;

    /// Fixed-window stub without eviction; enough to drive the engine.
    #[derive(Default)]
    struct StubLocal {
        counts: Mutex<HashMap<String, u32>>,
        synced: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl WindowCounter for StubLocal {
        async fn check(&self, key: &str, limit: u32, window: Duration) -> LocalVerdict {
            let mut counts = self.counts.lock();
            let count = counts.entry(key.to_string()).or_insert(0);
            let admitted = *count < limit;
            if admitted {
                *count += 1;
            }
            LocalVerdict {
                admitted,
                remaining: limit.saturating_sub(*count),
                reset_at: Utc::now() + chrono::Duration::from_std(window).unwrap(),
            }
        }

        async fn sync_remaining(
            &self,
            key: &str,
            limit: u32,
            remaining: u32,
            _reset_at: DateTime<Utc>,
        ) {
            self.counts
                .lock()
                .insert(key.to_string(), limit.saturating_sub(remaining));
            self.synced.lock().push((key.to_string(), remaining));
        }

        fn tracked_keys(&self) -> usize {
            self.counts.lock().len()
        }
    }

    enum SharedBehavior {
        Admit { remaining: u32 },
        Reject,
        Error,
    }

    struct StubShared {
        behavior: SharedBehavior,
        calls: Mutex<Vec<String>>,
    }

    impl StubShared {
        fn new(behavior: SharedBehavior) -> Self {
            Self {
                behavior,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SharedCounter for StubShared {
        async fn increment_and_check(
            &self,
            key: &str,
            _limit: u32,
            _window: Duration,
            _mode: CountingMode,
        ) -> Result<SharedVerdict, RateLimitError> {
            self.calls.lock().push(key.to_string());
            // A reset further out than any local window in these tests.
            let reset_at = Utc::now() + chrono::Duration::seconds(300);
            match self.behavior {
                SharedBehavior::Admit { remaining } => Ok(SharedVerdict {
                    success: true,
                    remaining,
                    reset_at,
                }),
                SharedBehavior::Reject => Ok(SharedVerdict {
                    success: false,
                    remaining: 0,
                    reset_at,
                }),
                SharedBehavior::Error => {
                    Err(RateLimitError::Backend("connection refused".into()))
                }
            }
        }
    }

    fn plans(address_limit: u32, session_limit: u32) -> Vec<DimensionPlan> {
        let window = Duration::from_secs(60);
        vec![
            DimensionPlan {
                dimension: Dimension::Address,
                limit: address_limit,
                window,
            },
            DimensionPlan {
                dimension: Dimension::Session,
                limit: session_limit,
                window,
            },
        ]
    }

    fn meta() -> RequestMetadata {
        RequestMetadata {
            forwarded_for: vec!["203.0.113.4".into()],
            session_key: Some("sess-1".into()),
            ..Default::default()
        }
    }

    fn engine(
        local: Arc<StubLocal>,
        shared: Option<Arc<StubShared>>,
        plans: Vec<DimensionPlan>,
        policy: FailurePolicy,
    ) -> DecisionEngine {
        DecisionEngine::new(
            local,
            shared.map(|s| s as Arc<dyn SharedCounter>),
            plans,
            policy,
            CountingMode::Fixed,
            false,
        )
    }

    #[tokio::test]
    async fn reports_the_tightest_dimension_on_admit() {
        let local = Arc::new(StubLocal::default());
        let engine = engine(local, None, plans(5, 3), FailurePolicy::FailOpen);

        let decision = engine.decide(&meta()).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.limit, 3);
        assert_eq!(decision.remaining, 2);
        assert!(decision.failed_dimension.is_none());
    }

    #[tokio::test]
    async fn local_rejection_short_circuits_the_shared_backend() {
        let local = Arc::new(StubLocal::default());
        let shared = Arc::new(StubShared::new(SharedBehavior::Admit { remaining: 99 }));
        let engine = engine(
            local,
            Some(shared.clone()),
            plans(1, 10),
            FailurePolicy::FailOpen,
        );

        assert!(engine.decide(&meta()).await.unwrap().admitted);
        let shared_calls_after_first = shared.calls.lock().len();

        let decision = engine.decide(&meta()).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.failed_dimension, Some(Dimension::Address));
        assert_eq!(
            shared.calls.lock().len(),
            shared_calls_after_first,
            "a locally rejected request must not reach the shared backend"
        );
    }

    #[tokio::test]
    async fn exhausted_session_is_tagged_as_session() {
        let local = Arc::new(StubLocal::default());
        let engine = engine(local, None, plans(10, 1), FailurePolicy::FailOpen);

        assert!(engine.decide(&meta()).await.unwrap().admitted);
        let decision = engine.decide(&meta()).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.failed_dimension, Some(Dimension::Session));
        assert_eq!(decision.limit, 1);
    }

    #[tokio::test]
    async fn dimensions_count_independently() {
        let local = Arc::new(StubLocal::default());
        let engine = engine(local.clone(), None, plans(10, 1), FailurePolicy::FailOpen);

        assert!(engine.decide(&meta()).await.unwrap().admitted);
        assert!(!engine.decide(&meta()).await.unwrap().admitted);

        // A different session from the same address is unaffected.
        let mut other = meta();
        other.session_key = Some("sess-2".into());
        let decision = engine.decide(&other).await.unwrap();
        assert!(decision.admitted);
    }

    #[tokio::test]
    async fn merge_takes_min_remaining_and_max_reset() {
        let local = Arc::new(StubLocal::default());
        let shared = Arc::new(StubShared::new(SharedBehavior::Admit { remaining: 1 }));
        let engine = engine(local, Some(shared), plans(10, 10), FailurePolicy::FailOpen);

        let before = Utc::now() + chrono::Duration::seconds(200);
        let decision = engine.decide(&meta()).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 1, "shared remaining is the minimum");
        assert!(
            decision.reset_at > before,
            "reset must follow the later shared window"
        );
    }

    #[tokio::test]
    async fn shared_rejection_overrides_local_admit_and_writes_back() {
        let local = Arc::new(StubLocal::default());
        let shared = Arc::new(StubShared::new(SharedBehavior::Reject));
        let engine = engine(
            local.clone(),
            Some(shared),
            plans(10, 10),
            FailurePolicy::FailOpen,
        );

        let decision = engine.decide(&meta()).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.failed_dimension, Some(Dimension::Address));

        let synced = local.synced.lock();
        assert!(
            synced.iter().any(|(key, remaining)| key == "ip:203.0.113.4" && *remaining == 0),
            "the shared count must be written back locally"
        );
    }

    #[tokio::test]
    async fn backend_failure_fails_open_by_default() {
        let local = Arc::new(StubLocal::default());
        let shared = Arc::new(StubShared::new(SharedBehavior::Error));
        let engine = engine(local, Some(shared), plans(10, 10), FailurePolicy::FailOpen);

        let decision = engine.decide(&meta()).await.unwrap();
        assert!(decision.admitted, "fail-open keeps the local verdict");
        assert!(decision.failed_dimension.is_none());
    }

    #[tokio::test]
    async fn backend_failure_fails_closed_when_configured() {
        let local = Arc::new(StubLocal::default());
        let shared = Arc::new(StubShared::new(SharedBehavior::Error));
        let engine = engine(local, Some(shared), plans(10, 10), FailurePolicy::FailClosed);

        let decision = engine.decide(&meta()).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.failed_dimension, Some(Dimension::Address));
    }

    #[tokio::test]
    async fn mints_a_session_key_once() {
        let local = Arc::new(StubLocal::default());
        let engine = engine(local, None, plans(10, 10), FailurePolicy::FailOpen);

        let mut m = meta();
        m.session_key = None;
        let first = engine.decide(&m).await.unwrap();
        let minted = first.minted_session_key.expect("a key must be minted");

        m.session_key = Some(minted);
        let second = engine.decide(&m).await.unwrap();
        assert!(second.minted_session_key.is_none());
    }

    #[tokio::test]
    async fn empty_metadata_without_session_plan_is_an_error() {
        let local = Arc::new(StubLocal::default());
        let address_only = vec![DimensionPlan {
            dimension: Dimension::Address,
            limit: 10,
            window: Duration::from_secs(60),
        }];
        let engine = engine(local, None, address_only, FailurePolicy::FailOpen);

        let err = engine.decide(&RequestMetadata::default()).await.unwrap_err();
        assert!(matches!(err, RateLimitError::MissingIdentity));
    }
}
