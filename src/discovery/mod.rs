pub mod discovery;
pub mod discovery_config;
pub mod discovery_events;
