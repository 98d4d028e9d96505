//! # MQTT Integration Module
//!
//! Connects to the photo broker, subscribes to one animal feed at a time and
//! turns every delivered message into a display change.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker address, timeouts, client id generation
//! ├── error.rs            - ConnectionError and SubscriptionError
//! ├── message_decoder.rs  - Payload → UTF-8 → JSON → optional `photo` field
//! ├── mqtt_handler.rs     - Session state machine, delivery task, command handle
//! └── topic_selector.rs   - The fixed animal topics and the current selection
//! ```
//!
//! ## Design Notes
//!
//! - **Transport is delegated**: framing, keep-alive and QoS are handled by
//!   `rumqttc`. This module only orchestrates connect, subscribe and teardown.
//! - **No shared display state**: decoded results travel to the UI thread over
//!   a channel. Nothing in here mutates what is on screen directly.
//! - **Explicit resubscription**: the previous topic is unsubscribed before a
//!   new one is subscribed, so at most one feed reaches the display.
//! - **Best effort**: failures become a notice plus a cleared display. Nothing
//!   is retried and there is no reconnect.

pub mod config;
pub mod error;
pub mod message_decoder;
pub mod mqtt_handler;
pub mod topic_selector;
