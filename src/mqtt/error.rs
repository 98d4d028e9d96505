//! Error definitions for the broker session

use std::time::Duration;
use thiserror::Error;

/// Failures establishing or keeping the broker session
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Network level failure before the broker acknowledged the session
    #[error("Broker {broker} unreachable: {reason}")]
    Unreachable { broker: String, reason: String },

    /// The broker answered CONNECT with a non-success code
    #[error("Broker refused connection: {0}")]
    Refused(String),

    #[error("No answer from broker within {0:?}")]
    Timeout(Duration),

    /// The established session dropped
    #[error("Connection lost: {0}")]
    Lost(String),
}

/// Failures subscribing to a topic
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Subscription request for {topic} timed out after {timeout:?}")]
    Timeout { topic: String, timeout: Duration },

    #[error("Subscription request failed: {0}")]
    Request(#[from] rumqttc::ClientError),

    #[error("Broker rejected subscription to {0}")]
    Rejected(String),

    /// The controller task is gone or its queue is full
    #[error("Channel error: {0}")]
    ChannelError(String),
}
