// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Reply Publisher
//!
//! This module publishes RPC replies. A reply always goes to the default
//! (no-name) exchange with the caller's `reply_to` queue as the routing key,
//! carries the inbound correlation id so the caller can match it to its
//! request, and propagates the active trace context in its headers.

use crate::{errors::AmqpError, otel::RabbitMQTracePropagator};
use lapin::{
    options::BasicPublishOptions,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::{global, Context};
use std::{collections::BTreeMap, sync::Arc};
use tracing::error;

/// Content encoding announced on every reply
pub const UTF8_CONTENT_ENCODING: &str = "utf-8";

/// The default exchange routes directly to the queue named by the routing key
const DEFAULT_EXCHANGE: &str = "";

/// Publishes reply messages for the RPC server.
///
/// The publisher shares the channel the request arrived on, so replies are
/// serialized with acknowledgments on the same worker context.
pub struct ReplyPublisher {
    channel: Arc<Channel>,
}

impl ReplyPublisher {
    /// Creates a new reply publisher on the given channel.
    ///
    /// # Returns
    /// An Arc-wrapped ReplyPublisher instance for sharing with the consumer
    pub fn new(channel: Arc<Channel>) -> Arc<ReplyPublisher> {
        Arc::new(ReplyPublisher { channel })
    }

    /// Publishes one reply body to the caller's reply queue.
    ///
    /// # Parameters
    /// * `ctx` - Trace context of the request being answered
    /// * `reply_to` - The queue name the caller is waiting on
    /// * `correlation_id` - The correlation id copied from the request
    /// * `body` - The reply payload (executor output or a JSON error shape)
    ///
    /// # Returns
    /// Ok(()) on success or AmqpError on failure
    pub async fn publish_reply(
        &self,
        ctx: &Context,
        reply_to: &str,
        correlation_id: &ShortString,
        body: &[u8],
    ) -> Result<(), AmqpError> {
        let mut btree = BTreeMap::<ShortString, AMQPValue>::default();

        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(ctx, &mut RabbitMQTracePropagator::new(&mut btree))
        });

        match self
            .channel
            .basic_publish(
                DEFAULT_EXCHANGE,
                reply_to,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                body,
                BasicProperties::default()
                    .with_correlation_id(correlation_id.clone())
                    .with_content_encoding(ShortString::from(UTF8_CONTENT_ENCODING))
                    .with_headers(FieldTable::from(btree)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing reply");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }
}
