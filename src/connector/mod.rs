pub mod commands;
pub mod connector;
pub mod connector_config;
pub mod elements;
pub mod receive_loop;
pub mod registry;
pub mod resubscription;
pub mod string_reassembly;
