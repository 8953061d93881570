//! Resource allocation and feature settings.

mod orchestrator;
mod settings;

pub(crate) use orchestrator::embedded;
pub use orchestrator::ResourceSettingsOrchestrator;
pub use settings::{subtype, ResourceSettings, ResourceType};
