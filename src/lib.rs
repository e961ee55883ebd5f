// Supporting modules
pub mod config;
pub mod error;
pub mod join;
pub mod metrics;
pub mod telemetry;

// Domain layer
pub mod content;
pub mod event;
pub mod template;

// Application layer
pub mod archive;
pub mod orchestrator;
