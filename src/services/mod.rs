pub mod payments;
pub mod provider_api;
pub mod reconciliation;
pub mod restorer;
pub mod translator;
