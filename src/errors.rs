// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP RPC Server
//!
//! This module provides the error taxonomy for the RPC server. The `AmqpError`
//! enum covers construction-time validation failures, connection/channel setup
//! failures, per-message processing failures, and the single fatal error that
//! escapes the server once running: exhaustion of the reconnection policy.

use thiserror::Error;

/// Represents errors that can occur while configuring or running the RPC server.
///
/// Construction errors are raised synchronously before any network activity.
/// Setup errors feed the supervisor's reconnect decision. Per-message errors
/// are contained by the message processor and never escape it.
/// `MaxReconnectionAttemptsReached` is the only fatal variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// The configured DSN is empty or not prefixed with a broker URI scheme
    #[error("invalid amqp dsn: {0}")]
    InvalidDsnError(String),

    /// The configured exchange name is empty
    #[error("invalid exchange name: {0}")]
    InvalidExchangeNameError(String),

    /// A queue name was supplied but is empty
    #[error("invalid queue name: {0}")]
    InvalidQueueNameError(String),

    /// Error establishing a connection to the message broker
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring the prefetch quality of service
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error starting the consumer on the bound queue
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error publishing a reply
    #[error("failure to publish")]
    PublishingError,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error rejecting a message
    #[error("failure to reject message")]
    RejectMessageError,

    /// The reconnection policy was exhausted; the server has stopped
    #[error("unable to reconnect to the message broker after {0} attempts")]
    MaxReconnectionAttemptsReached(u32),
}
