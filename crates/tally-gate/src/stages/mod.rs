//! Built-in gate stages.

pub mod provider;
pub mod role;
pub mod studio;

pub use provider::ProviderSelfStage;
pub use role::RoleStage;
pub use studio::StudioAffiliationStage;
