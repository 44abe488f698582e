pub mod accounts;
pub mod billing;
pub mod community;
pub mod engine;
pub mod lots;
pub mod notifier;
pub mod reconciler;
pub mod reports;
pub mod sweeper;

pub use accounts::AccountService;
pub use billing::BillingService;
pub use community::CommunityService;
pub use engine::{Claim, ReservationEngine};
pub use lots::LotService;
pub use notifier::Notifier;
pub use reconciler::{ApplyOutcome, IntegrationKeys, PaymentReconciler};
pub use reports::ReportService;
pub use sweeper::{ExpirySweeper, SweepReport};

#[cfg(test)]
mod tests;
