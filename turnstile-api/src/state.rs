use std::sync::Arc;

use turnstile_core::TicketRepository;
use turnstile_store::RedisClient;
use turnstile_ticket::IssuanceService;

use crate::metrics::Metrics;
use crate::runs::RunRegistry;
use crate::scan::ScanSessions;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn TicketRepository>,
    pub issuance: IssuanceService,
    pub runs: RunRegistry,
    pub scanners: ScanSessions,
    pub redis: Option<Arc<RedisClient>>,
    pub metrics: Arc<Metrics>,
    pub auth: AuthConfig,
    pub requests_per_minute: i64,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn TicketRepository>,
        issuance: IssuanceService,
        auth: AuthConfig,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            scanners: ScanSessions::new(repo.clone()),
            repo,
            issuance,
            runs: RunRegistry::default(),
            redis: None,
            metrics: Arc::new(Metrics::new()?),
            auth,
            requests_per_minute: 600,
        })
    }

    pub fn with_rate_limit(mut self, redis: Arc<RedisClient>, requests_per_minute: i64) -> Self {
        self.redis = Some(redis);
        self.requests_per_minute = requests_per_minute;
        self
    }
}
