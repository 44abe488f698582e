use smartpark_core::{DocumentStore, PaymentGateway};
use smartpark_reservation::{
    AccountService, BillingService, CommunityService, ExpirySweeper, IntegrationKeys, LotService, Notifier,
    PaymentReconciler, ReportService, ReservationEngine,
};
use smartpark_store::app_config::{Config, RateLimitConfig};
use smartpark_store::RedisClient;
use std::sync::Arc;
use std::time::Duration;

use crate::middleware::resiliency::ResiliencyState;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub redis: Option<Arc<RedisClient>>,
    pub engine: Arc<ReservationEngine>,
    pub reconciler: Arc<PaymentReconciler>,
    pub sweeper: Arc<ExpirySweeper>,
    pub lots: LotService,
    pub accounts: AccountService,
    pub billing: BillingService,
    pub community: CommunityService,
    pub notifier: Notifier,
    pub reports: ReportService,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub resiliency: Arc<ResiliencyState>,
}

impl AppState {
    /// Wire every service over one store and one gateway
    pub fn new(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        gateway: Arc<dyn PaymentGateway>,
        redis: Option<Arc<RedisClient>>,
    ) -> Self {
        let notifier = Notifier::new(store.clone());
        let billing = BillingService::new(store.clone(), notifier.clone(), config.billing.clone());
        let engine = Arc::new(ReservationEngine::new(
            store.clone(),
            notifier.clone(),
            billing.clone(),
            config.reservations.clone(),
        ));
        let keys = IntegrationKeys {
            usd: config.paynow.usd.integration_key.clone(),
            zwl: config.paynow.zwl.integration_key.clone(),
        };
        let reconciler = Arc::new(PaymentReconciler::new(
            store.clone(),
            gateway,
            engine.clone(),
            billing.clone(),
            notifier.clone(),
            keys,
            config.payments.clone(),
        ));
        let sweeper = Arc::new(ExpirySweeper::new(
            store.clone(),
            engine.clone(),
            reconciler.clone(),
            Duration::from_secs(config.sweeper.interval_seconds),
        ));

        Self {
            lots: LotService::new(store.clone()),
            accounts: AccountService::new(store.clone()),
            community: CommunityService::new(store.clone(), notifier.clone()),
            reports: ReportService::new(store.clone()),
            store,
            redis,
            engine,
            reconciler,
            sweeper,
            billing,
            notifier,
            auth: AuthConfig {
                secret: config.auth.jwt_secret.clone(),
                expiration: config.auth.jwt_expiration_seconds,
            },
            rate_limit: config.rate_limit.clone(),
            resiliency: Arc::new(ResiliencyState::default()),
        }
    }
}
