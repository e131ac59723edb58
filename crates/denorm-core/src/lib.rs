//! denorm-core — configuration shared by the denorm control plane.
//!
//! Every knob the coordinator, determination engine, and daemon read lives
//! in [`DenormConfig`], parsed from `denorm.toml`.

pub mod config;
pub mod duration;

pub use config::{
    BrokerConfig, ConfigError, CoordinatorConfig, DenormConfig, DeterminationConfig,
    StoreConfig,
};
pub use duration::parse_duration;
