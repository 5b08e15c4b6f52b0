//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `engine` - MQTT client for the step engine (commands + status)
//! - `ranging` - MQTT ingest for scanner ranging frames and permission state
//! - `reader` - MQTT short-range identification reads
//! - `notifier` - Ordered typed channel for presentation notifications

pub mod engine;
pub mod notifier;
pub mod ranging;
pub mod reader;

// Re-export commonly used types
pub use engine::EngineClient;
pub use notifier::{create_view_channel, UserAlert, ViewEvent, ViewSender};
pub use ranging::RangingClient;
pub use reader::ReaderClient;
