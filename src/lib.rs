//! rabbit-bridge - application events to RabbitMQ
//!
//! Subscribes to configured application events, runs each payload through a
//! transformer, and republishes the result to a RabbitMQ publication named
//! after the event.
//!
//! ## Architecture
//! ```text
//! [EventService] --(occurrence)--> [Bridge] --(transform)--> [BrokerHandle] --> RabbitMQ
//!                                     |
//!                                     +-- connect / close / notifications
//! ```

pub mod broker;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod events;
pub mod plugin;
pub mod shutdown;
pub mod transform;
pub mod utils;

pub use context::AppContext;
pub use coordinator::{Bridge, BridgeError, ConnectionState};
