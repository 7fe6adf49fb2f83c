//! Service routing: decide per request whether each dependency goes to the
//! real backend or the local mock.

pub mod health;

pub use health::{HealthProbe, HealthRecord, HttpLivenessCheck, LivenessCheck};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A remote dependency the gateway fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    Mail,
    Scanner,
}

impl Dependency {
    pub const ALL: [Dependency; 2] = [Dependency::Mail, Dependency::Scanner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Scanner => "scanner",
        }
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which backend served (or will serve) a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Mock,
    Real,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mock => write!(f, "mock"),
            Self::Real => write!(f, "real"),
        }
    }
}

/// Process-wide operator override, from `USE_REAL_SERVICES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorMode {
    ForceMock,
    ForceReal,
    Auto,
}

impl std::str::FromStr for OperatorMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "real" => Ok(Self::ForceReal),
            "false" | "mock" => Ok(Self::ForceMock),
            "auto" | "" => Ok(Self::Auto),
            other => Err(format!("expected true, false or auto, got {other:?}")),
        }
    }
}

/// Why a route was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    OperatorForcedReal,
    OperatorForcedMock,
    Healthy,
    Unhealthy,
}

/// Per-request routing decision for one dependency. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub dependency: Dependency,
    pub chosen: Route,
    pub reason: DecisionReason,
}

/// Routes actually used during one request, keyed the way responses and the
/// timing log expose them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouteMap {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailserver: Option<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanner: Option<Route>,
}

impl RouteMap {
    pub fn set(&mut self, dependency: Dependency, route: Route) {
        match dependency {
            Dependency::Mail => self.mailserver = Some(route),
            Dependency::Scanner => self.scanner = Some(route),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mailserver.is_none() && self.scanner.is_none()
    }
}

/// Real endpoints per dependency. A missing endpoint means "never healthy".
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub mail: Option<String>,
    pub scanner: Option<String>,
}

impl Endpoints {
    pub fn get(&self, dependency: Dependency) -> Option<&str> {
        match dependency {
            Dependency::Mail => self.mail.as_deref(),
            Dependency::Scanner => self.scanner.as_deref(),
        }
    }
}

/// Per-request decision engine.
pub struct ServiceRouter {
    mode: OperatorMode,
    probe: Arc<HealthProbe>,
    endpoints: Endpoints,
}

impl ServiceRouter {
    pub fn new(mode: OperatorMode, probe: Arc<HealthProbe>, endpoints: Endpoints) -> Self {
        Self {
            mode,
            probe,
            endpoints,
        }
    }

    pub fn mode(&self) -> OperatorMode {
        self.mode
    }

    pub fn probe(&self) -> &Arc<HealthProbe> {
        &self.probe
    }

    /// Pure decision rule.
    pub fn decide(dependency: Dependency, healthy: bool, mode: OperatorMode) -> RoutingDecision {
        let (chosen, reason) = match mode {
            OperatorMode::ForceReal => (Route::Real, DecisionReason::OperatorForcedReal),
            OperatorMode::ForceMock => (Route::Mock, DecisionReason::OperatorForcedMock),
            OperatorMode::Auto if healthy => (Route::Real, DecisionReason::Healthy),
            OperatorMode::Auto => (Route::Mock, DecisionReason::Unhealthy),
        };
        RoutingDecision {
            dependency,
            chosen,
            reason,
        }
    }

    /// Decide the route for one dependency, consulting the health probe only
    /// when the operator mode leaves the answer open.
    pub async fn route(&self, dependency: Dependency) -> RoutingDecision {
        let healthy = match self.mode {
            OperatorMode::Auto => {
                self.probe
                    .check(dependency, self.endpoints.get(dependency))
                    .await
            }
            OperatorMode::ForceReal | OperatorMode::ForceMock => false,
        };
        let decision = Self::decide(dependency, healthy, self.mode);
        debug!(
            dependency = %dependency,
            route = %decision.chosen,
            reason = ?decision.reason,
            "Routing decision"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    struct FixedLiveness {
        alive: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LivenessCheck for FixedLiveness {
        async fn is_alive(&self, _endpoint: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.alive
        }
    }

    fn router(mode: OperatorMode, alive: bool) -> (ServiceRouter, Arc<FixedLiveness>) {
        let check = Arc::new(FixedLiveness {
            alive,
            calls: AtomicUsize::new(0),
        });
        let probe = Arc::new(HealthProbe::new(check.clone(), Duration::from_secs(10)));
        let endpoints = Endpoints {
            mail: Some("http://mail.invalid".into()),
            scanner: Some("http://scanner.invalid".into()),
        };
        (ServiceRouter::new(mode, probe, endpoints), check)
    }

    #[test]
    fn force_real_ignores_health() {
        for healthy in [true, false] {
            let d = ServiceRouter::decide(Dependency::Scanner, healthy, OperatorMode::ForceReal);
            assert_eq!(d.chosen, Route::Real);
        }
    }

    #[test]
    fn force_mock_ignores_health() {
        for healthy in [true, false] {
            let d = ServiceRouter::decide(Dependency::Mail, healthy, OperatorMode::ForceMock);
            assert_eq!(d.chosen, Route::Mock);
        }
    }

    #[test]
    fn auto_follows_health() {
        let up = ServiceRouter::decide(Dependency::Mail, true, OperatorMode::Auto);
        let down = ServiceRouter::decide(Dependency::Mail, false, OperatorMode::Auto);
        assert_eq!(up.chosen, Route::Real);
        assert_eq!(up.reason, DecisionReason::Healthy);
        assert_eq!(down.chosen, Route::Mock);
        assert_eq!(down.reason, DecisionReason::Unhealthy);
    }

    #[test]
    fn parses_operator_mode() {
        assert_eq!("true".parse::<OperatorMode>().unwrap(), OperatorMode::ForceReal);
        assert_eq!("FALSE".parse::<OperatorMode>().unwrap(), OperatorMode::ForceMock);
        assert_eq!("auto".parse::<OperatorMode>().unwrap(), OperatorMode::Auto);
        assert!("sometimes".parse::<OperatorMode>().is_err());
    }

    #[tokio::test]
    async fn force_real_routes_real_even_when_unhealthy() {
        let (router, check) = router(OperatorMode::ForceReal, false);
        assert_eq!(router.route(Dependency::Scanner).await.chosen, Route::Real);
        assert_eq!(check.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn force_mock_never_probes() {
        let (router, check) = router(OperatorMode::ForceMock, true);
        assert_eq!(router.route(Dependency::Mail).await.chosen, Route::Mock);
        assert_eq!(check.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn auto_routes_each_dependency_independently() {
        let (router, check) = router(OperatorMode::Auto, true);
        assert_eq!(router.route(Dependency::Mail).await.chosen, Route::Real);
        assert_eq!(router.route(Dependency::Scanner).await.chosen, Route::Real);
        // One probe per dependency.
        assert_eq!(check.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn route_map_serializes_only_used_routes() {
        let mut routes = RouteMap::default();
        assert!(routes.is_empty());
        routes.set(Dependency::Scanner, Route::Mock);
        let json = serde_json::to_value(routes).unwrap();
        assert_eq!(json, serde_json::json!({"scanner": "mock"}));
    }
}
