// app.rs - Shared state and router
//
// Layer order, outermost first: CORS, trace, client IP, principal, rate limit.
// Ownership gates are route layers, so they run after routing and after the
// rate limit has admitted the request.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post, MethodRouter},
    Router,
};
use tokio::task::JoinHandle;
use tracing::warn;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::clock::{self, Clock};
use crate::config::{AppConfig, ConfigError, SecurityConfig};
use crate::domain::{DomainStore, ResourceLookup};
use crate::handlers::{protected, public};
use crate::middleware::{
    client_ip_middleware, ownership_gate, principal_middleware, rate_limit_middleware, OwnershipGate,
    TrustedProxies,
};
use crate::security::anomaly::{AlertSink, LogAlertSink};
use crate::security::ownership::{OwnershipStrategy, ResolverRegistry};
use crate::security::{AnomalyMonitor, OwnershipPolicy, OwnershipValidator, RateLimiter, ResourceType};
use crate::store::{spawn_local_sweeper, CounterStore, MemoryCounterStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub domain: Arc<dyn DomainStore>,
    pub validator: OwnershipValidator,
    pub limiter: Arc<RateLimiter>,
    pub monitor: Arc<AnomalyMonitor>,
    pub proxies: Arc<TrustedProxies>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn builder(config: AppConfig) -> AppStateBuilder {
        AppStateBuilder {
            config,
            clock: clock::system(),
            sink: Arc::new(LogAlertSink),
            counters: None,
            registry: None,
        }
    }

    /// Periodically drop idle entries from the process-local fallback counters
    pub fn spawn_fallback_sweeper(&self, every: Duration) -> JoinHandle<()> {
        spawn_local_sweeper(
            self.limiter.fallback(),
            self.limiter.max_window(),
            self.monitor.fallback_counters(),
            self.clock.clone(),
            every,
        )
    }
}

pub struct AppStateBuilder {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AlertSink>,
    counters: Option<Arc<dyn CounterStore>>,
    registry: Option<ResolverRegistry>,
}

impl AppStateBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Shared counter store for rate limits and anomaly counts; defaults to an
    /// in-process store
    pub fn counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counters = Some(store);
        self
    }

    /// Replace the built-in resolver table
    pub fn resolvers(mut self, registry: ResolverRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build<D>(self, domain: Arc<D>) -> Result<AppState, ConfigError>
    where
        D: DomainStore + 'static,
    {
        self.config.validate()?;
        let proxies = TrustedProxies::parse(&self.config.security.trusted_proxies)?;

        let lookup: Arc<dyn ResourceLookup> = domain.clone();
        let registry = self
            .registry
            .unwrap_or_else(|| ResolverRegistry::with_defaults(lookup));
        let counters: Arc<dyn CounterStore> = match self.counters {
            Some(store) => store,
            None => Arc::new(MemoryCounterStore::new(self.clock.clone())),
        };

        let limiter = RateLimiter::new(counters.clone(), self.config.rate_limit.clone(), self.clock.clone());
        let monitor = AnomalyMonitor::new(counters, self.sink, self.config.anomaly.clone(), self.clock.clone());

        Ok(AppState {
            config: Arc::new(self.config),
            domain,
            validator: OwnershipValidator::new(registry),
            limiter: Arc::new(limiter),
            monitor: Arc::new(monitor),
            proxies: Arc::new(proxies),
            clock: self.clock,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(public::health_get))
        .route("/auth/login", post(public::auth::login_post))
        .merge(protected_routes(&state))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), principal_middleware))
        .layer(from_fn_with_state(state.clone(), client_ip_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.security))
        .with_state(state)
}

fn protected_routes(state: &AppState) -> Router<AppState> {
    use protected::{medication_record, medication_schedule, mood_diary, side_effect};

    Router::new()
        .route(
            "/medication-schedule/:medication_schedule_id",
            guarded(
                state,
                get(medication_schedule::schedule_get),
                OwnershipPolicy::path(ResourceType::MEDICATION_SCHEDULE, "medication_schedule_id"),
            ),
        )
        .route(
            "/medication-schedule/member/:member_id",
            guarded(
                state,
                get(medication_schedule::schedules_by_member_get),
                OwnershipPolicy::path(ResourceType::MEDICATION_SCHEDULE_BY_MEMBER, "member_id")
                    .with_strategy(OwnershipStrategy::ThroughMember),
            ),
        )
        .route(
            "/medication-record/:medication_record_id",
            guarded(
                state,
                get(medication_record::record_get),
                OwnershipPolicy::path(ResourceType::MEDICATION_RECORD, "medication_record_id")
                    .with_strategy(OwnershipStrategy::ThroughSchedule),
            ),
        )
        .route(
            "/medication-record",
            guarded(
                state,
                post(medication_record::record_post),
                OwnershipPolicy::body(ResourceType::MEDICATION_SCHEDULE, "medicationScheduleId"),
            ),
        )
        .route(
            "/mood-diary/:mood_diary_id",
            guarded(
                state,
                get(mood_diary::diary_get),
                OwnershipPolicy::path(ResourceType::MOOD_DIARY, "mood_diary_id"),
            ),
        )
        .route(
            "/mood-diary",
            guarded(
                state,
                post(mood_diary::diary_post),
                OwnershipPolicy::body(ResourceType::MOOD_DIARY_BY_MEMBER, "request.memberId")
                    .with_strategy(OwnershipStrategy::ThroughMember),
            ),
        )
        .route(
            "/side-effect/list",
            guarded(
                state,
                get(side_effect::side_effect_list),
                OwnershipPolicy::query(ResourceType::MEMBER, "member_id"),
            ),
        )
}

/// Attach an ownership gate for `policy` to one route
fn guarded(state: &AppState, route: MethodRouter<AppState>, policy: OwnershipPolicy) -> MethodRouter<AppState> {
    if !state.validator.registry().contains(policy.resource_type) {
        warn!(
            resource_type = %policy.resource_type,
            "No ownership resolver registered; every request to this route will be denied"
        );
    }
    let gate = OwnershipGate::new(
        state.validator.clone(),
        policy,
        state.monitor.clone(),
        state.config.server.max_request_size_bytes,
    );
    route.route_layer(from_fn_with_state(gate, ownership_gate))
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    if !security.enable_cors {
        return CorsLayer::new();
    }
    if security.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
