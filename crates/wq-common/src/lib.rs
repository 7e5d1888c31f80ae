//! ---
//! wq_section: "01-core-functionality"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Shared primitives and utilities for the node and monitor."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Shared primitives for the water-quality telemetry workspace.
//! This crate exposes configuration loading and logging setup consumed by
//! both daemons.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, ConnectConfig, LoadedAppConfig, LoggingConfig, MonitorConfig, NodeConfig,
    PermittedRange, ReactorConfig, ReconnectMode, SimulationConfig, TemperatureFailurePolicy,
    WireConfig,
};
pub use logging::{init_tracing, LogFormat};
