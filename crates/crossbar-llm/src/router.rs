//! Virtual router engine
//!
//! Given a classification and the route-pool table, picks one
//! `(provider, model, key)` triple using credential health snapshots,
//! priority tiers, selection penalties, and per-pool round-robin.

use std::sync::Arc;

use crossbar_classify::Classification;
use crossbar_config::{ResolvedRoutes, RouteTarget};
use crossbar_pool::{KeyId, KeyRegistry, KeySnapshot};

use crate::error::GatewayError;

/// Outcome of one routing selection
///
/// Carries the full eligible snapshot for observability; never persisted
/// across requests.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// Route whose pool was used
    pub route: String,
    /// Chosen pool entry
    pub target: RouteTarget,
    /// Chosen credential
    pub key: KeyId,
    /// Eligible keys at selection time, in selection order
    pub pool_snapshot: Vec<KeySnapshot>,
    /// Classification confidence behind the route choice
    pub confidence: f64,
    /// Classification reasons, for the decision log
    pub reasons: Vec<String>,
}

/// Route-pool driven credential selector
pub struct VirtualRouter {
    routes: ResolvedRoutes,
    registry: Arc<KeyRegistry>,
}

impl VirtualRouter {
    pub fn new(routes: ResolvedRoutes, registry: Arc<KeyRegistry>) -> Self {
        Self { routes, registry }
    }

    /// Pool table used by this router
    pub fn routes(&self) -> &ResolvedRoutes {
        &self.routes
    }

    /// Select a target and credential for a classified request
    ///
    /// `exclude` lists keys already burned by earlier attempts of the
    /// same request; retries therefore draw from `pool \ excluded`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NoHealthyUpstream`] when no target in the
    /// chosen pool (or the `default` fallback pool) has an eligible key.
    pub fn select(&self, classification: &Classification, exclude: &[KeyId]) -> Result<RoutingDecision, GatewayError> {
        let (pool_route, targets) = self
            .routes
            .pool(&classification.route)
            .map(|targets| (classification.route.as_str(), targets))
            .or_else(|| self.routes.pool("default").map(|t| ("default", t)))
            .ok_or_else(|| GatewayError::NoHealthyUpstream {
                route: classification.route.clone(),
            })?;

        for target in targets {
            let snapshot = self.registry.snapshot(&target.provider);

            let selected = match &target.key_alias {
                // Pinned alias: only that credential qualifies
                Some(alias) => snapshot
                    .iter()
                    .find(|k| &k.id.alias == alias && !exclude.contains(&k.id))
                    .cloned(),
                // Unpinned: rotate among the head tie-group
                None => self.pick_rotating(pool_route, &snapshot, exclude),
            };

            if let Some(key) = selected {
                tracing::debug!(
                    route = pool_route,
                    target = %target,
                    key = %key.id,
                    eligible = snapshot.len(),
                    "routing decision"
                );
                return Ok(RoutingDecision {
                    route: pool_route.to_owned(),
                    target: target.clone(),
                    key: key.id.clone(),
                    pool_snapshot: snapshot,
                    confidence: classification.confidence,
                    reasons: classification.reasons.clone(),
                });
            }
        }

        Err(GatewayError::NoHealthyUpstream {
            route: pool_route.to_owned(),
        })
    }

    /// Pick from the snapshot head: all keys tied on (tier, penalty) with
    /// the best key form the rotation group; the pool cursor spreads
    /// selections evenly across them
    fn pick_rotating(&self, pool: &str, snapshot: &[KeySnapshot], exclude: &[KeyId]) -> Option<KeySnapshot> {
        let candidates: Vec<&KeySnapshot> = snapshot.iter().filter(|k| !exclude.contains(&k.id)).collect();
        let best = candidates.first()?;

        let tie_group: Vec<&KeySnapshot> = candidates
            .iter()
            .copied()
            .filter(|k| {
                k.priority_tier == best.priority_tier
                    && (k.selection_penalty - best.selection_penalty).abs() < f64::EPSILON
            })
            .collect();

        let cursor = self.registry.advance_cursor(pool);
        let pick = usize::try_from(cursor).unwrap_or(0) % tie_group.len();
        Some(tie_group[pick].clone())
    }
}

#[cfg(test)]
mod tests {
    use crossbar_config::Config;
    use crossbar_pool::FailureKind;

    use super::*;

    fn setup() -> (VirtualRouter, Arc<KeyRegistry>) {
        let config: Config = toml::from_str(
            r#"
            [providers.providerA]
            type = "chat"
            base_url = "https://a.example/v1"
            [providers.providerA.auth.keys.key1]
            value = "sk-1"
            [providers.providerA.auth.keys.key2]
            value = "sk-2"
            [providers.providerA.models."glm-4.6"]

            [providers.providerB]
            type = "anthropic"
            base_url = "https://b.example"
            [providers.providerB.auth.keys.main]
            value = "sk-b"
            [providers.providerB.models."opus-x"]

            [routing.pools]
            default = ["providerA.glm-4.6"]
            vision = ["providerB.opus-x.main", "providerA.glm-4.6.key1"]
            "#,
        )
        .unwrap();

        let routes = config.validate().unwrap();
        let registry = Arc::new(KeyRegistry::from_config(&config));
        (VirtualRouter::new(routes, Arc::clone(&registry)), registry)
    }

    fn classification(route: &str) -> Classification {
        Classification {
            route: route.to_owned(),
            confidence: 1.0,
            reasons: vec![],
            alternative: None,
            estimated_tokens: 0,
        }
    }

    #[test]
    fn default_pool_round_robin_is_fair() {
        let (router, _) = setup();
        let mut counts = std::collections::HashMap::new();
        for _ in 0..10 {
            let decision = router.select(&classification("default"), &[]).unwrap();
            *counts.entry(decision.key.alias.clone()).or_insert(0u32) += 1;
        }
        assert_eq!(counts["key1"], 5);
        assert_eq!(counts["key2"], 5);
    }

    #[test]
    fn unknown_route_falls_back_to_default_pool() {
        let (router, _) = setup();
        let decision = router.select(&classification("coding"), &[]).unwrap();
        assert_eq!(decision.route, "default");
        assert_eq!(decision.target.provider, "providerA");
    }

    #[test]
    fn pinned_alias_is_respected() {
        let (router, _) = setup();
        let decision = router.select(&classification("vision"), &[]).unwrap();
        assert_eq!(decision.key, KeyId::new("providerB", "main"));
    }

    #[test]
    fn pinned_target_falls_through_when_cooling() {
        let (router, registry) = setup();
        registry.report_failure(
            &KeyId::new("providerB", "main"),
            FailureKind::RateLimited,
            Some(429),
            Some(60_000),
        );

        let decision = router.select(&classification("vision"), &[]).unwrap();
        assert_eq!(decision.key, KeyId::new("providerA", "key1"));
    }

    #[test]
    fn excluded_keys_are_skipped() {
        let (router, _) = setup();
        let excluded = vec![KeyId::new("providerA", "key1")];
        for _ in 0..3 {
            let decision = router.select(&classification("default"), &excluded).unwrap();
            assert_eq!(decision.key.alias, "key2");
        }
    }

    #[test]
    fn exhausted_pool_reports_no_healthy_upstream() {
        let (router, registry) = setup();
        registry.report_failure(&KeyId::new("providerA", "key1"), FailureKind::AuthError, Some(401), None);
        registry.report_failure(&KeyId::new("providerA", "key2"), FailureKind::AuthError, Some(403), None);

        let err = router.select(&classification("default"), &[]).unwrap_err();
        assert!(matches!(err, GatewayError::NoHealthyUpstream { .. }));
    }

    #[test]
    fn decision_carries_snapshot() {
        let (router, _) = setup();
        let decision = router.select(&classification("default"), &[]).unwrap();
        assert_eq!(decision.pool_snapshot.len(), 2);
    }
}
