// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Processor
//!
//! This module turns one inbound delivery into exactly one terminal outcome:
//! ack plus reply, silent reject, or reject plus error reply. Failures are
//! contained here and never escape past this boundary; the supervisor only
//! ever sees a log line.
//!
//! The delivery is acknowledged strictly before the executor runs, so a crash
//! mid-execution does not trigger redelivery of a message already claimed as
//! processed. That is a deliberate at-most-once-execution choice.

use crate::{
    errors::AmqpError,
    handler::{ContentValidator, Executor},
    otel,
    publisher::ReplyPublisher,
};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicRejectOptions},
    protocol::basic::AMQPProperties,
    types::ShortString,
};
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    trace::{Span, Status},
};
use serde::Serialize;
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error, warn};

/// Error reply body sent when the content validator refuses a message
pub const INVALID_MESSAGE_CONTENT: &str = "invalid_message_content";

/// Sender attribution used in logs when the message carries no `app_id`
const UNKNOWN_SENDER: &str = "unknown";

#[derive(Serialize)]
struct ErrorReply<'a> {
    error: &'a str,
}

/// Processes one delivery from the broker.
///
/// 1. Without both `correlation_id` and `reply_to` the delivery is rejected
///    without requeue and no reply is sent (there is nowhere to send one).
/// 2. A validator verdict of false rejects the delivery and informs the
///    sender with the `invalid_message_content` error reply.
/// 3. Otherwise the delivery is acknowledged, the executor runs, and its
///    output (or a JSON error shape carrying the failure message) is
///    published to the caller's reply queue.
///
/// # Returns
/// Ok(()) on success or AmqpError on failure
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    executor: &Arc<dyn Executor>,
    validator: Option<&Arc<dyn ContentValidator>>,
    publisher: &ReplyPublisher,
) -> Result<(), AmqpError> {
    let props = &delivery.properties;
    let sender = sender_id(props);

    let (ctx, mut span) = otel::new_span(props, tracer, "rpc-request");

    debug!(
        "{} - {} - received new message from the message broker",
        sender, delivery.delivery_tag
    );

    let Some((correlation_id, reply_to)) = reply_address(props) else {
        warn!(
            "{} - {} - the message did not contain the needed properties and will be rejected",
            sender, delivery.delivery_tag
        );
        return reject(delivery, &mut span).await;
    };

    if let Some(validator) = validator {
        if !validator.validate(&delivery.data) {
            warn!(
                "{} - {} - the message was deemed invalid by the validator, \
                 the sender will be informed",
                sender, delivery.delivery_tag
            );
            reject(delivery, &mut span).await?;

            let body = error_body(INVALID_MESSAGE_CONTENT);
            return publisher
                .publish_reply(&ctx, reply_to.as_str(), correlation_id, &body)
                .await;
        }
    }

    // Ack before the executor runs: a crash during execution must not cause
    // redelivery of a message already claimed as processed.
    if let Err(e) = delivery.ack(BasicAckOptions { multiple: false }).await {
        error!("error whiling ack msg");
        span.record_error(&e);
        span.set_status(Status::Error {
            description: Cow::from("error to ack msg"),
        });
        return Err(AmqpError::AckMessageError);
    }

    let reply = run_executor(executor.as_ref(), delivery.data.clone()).await;

    match publisher
        .publish_reply(&ctx, reply_to.as_str(), correlation_id, &reply)
        .await
    {
        Err(err) => {
            span.set_status(Status::Error {
                description: Cow::from("error to publish reply"),
            });
            Err(err)
        }
        _ => {
            span.set_status(Status::Ok);
            Ok(())
        }
    }
}

/// Runs the executor and converts a failure into the JSON error reply body.
///
/// The RPC caller always receives a response, never a silent drop.
async fn run_executor(executor: &dyn Executor, body: Vec<u8>) -> Vec<u8> {
    match executor.exec(body).await {
        Ok(reply) => reply,
        Err(err) => error_body(&err.to_string()),
    }
}

async fn reject(delivery: &Delivery, span: &mut BoxedSpan) -> Result<(), AmqpError> {
    match delivery
        .reject(BasicRejectOptions { requeue: false })
        .await
    {
        Err(e) => {
            error!("error whiling reject msg");
            span.record_error(&e);
            span.set_status(Status::Error {
                description: Cow::from("error to reject msg"),
            });
            Err(AmqpError::RejectMessageError)
        }
        _ => Ok(()),
    }
}

/// Extracts the reply address of a request: its correlation id and reply
/// queue. A message missing either cannot be answered.
fn reply_address(props: &AMQPProperties) -> Option<(&ShortString, &ShortString)> {
    match (props.correlation_id().as_ref(), props.reply_to().as_ref()) {
        (Some(correlation_id), Some(reply_to)) => Some((correlation_id, reply_to)),
        _ => None,
    }
}

fn sender_id(props: &AMQPProperties) -> &str {
    props
        .app_id()
        .as_ref()
        .map(|app_id| app_id.as_str())
        .unwrap_or(UNKNOWN_SENDER)
}

fn error_body(message: &str) -> Vec<u8> {
    serde_json::to_vec(&ErrorReply { error: message }).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ExecutionError, MockExecutor};

    fn props_with(correlation_id: Option<&str>, reply_to: Option<&str>) -> AMQPProperties {
        let mut props = AMQPProperties::default();
        if let Some(id) = correlation_id {
            props = props.with_correlation_id(ShortString::from(id));
        }
        if let Some(queue) = reply_to {
            props = props.with_reply_to(ShortString::from(queue));
        }
        props
    }

    #[test]
    fn reply_address_requires_both_properties() {
        assert!(reply_address(&props_with(None, None)).is_none());
        assert!(reply_address(&props_with(Some("abc"), None)).is_none());
        assert!(reply_address(&props_with(None, Some("client-q"))).is_none());

        let props = props_with(Some("abc"), Some("client-q"));
        let (correlation_id, reply_to) = reply_address(&props).unwrap();
        assert_eq!(correlation_id.as_str(), "abc");
        assert_eq!(reply_to.as_str(), "client-q");
    }

    #[test]
    fn sender_defaults_to_unknown() {
        assert_eq!(sender_id(&AMQPProperties::default()), "unknown");

        let props = AMQPProperties::default().with_app_id(ShortString::from("billing"));
        assert_eq!(sender_id(&props), "billing");
    }

    #[test]
    fn error_body_is_the_json_error_shape() {
        assert_eq!(
            error_body(INVALID_MESSAGE_CONTENT),
            br#"{"error":"invalid_message_content"}"#
        );
        assert_eq!(error_body("bad input"), br#"{"error":"bad input"}"#);
    }

    #[tokio::test]
    async fn executor_output_is_the_reply_body() {
        let mut executor = MockExecutor::new();
        executor
            .expect_exec()
            .returning(|body| Ok(body));

        let reply = run_executor(&executor, b"ping".to_vec()).await;
        assert_eq!(reply, b"ping");
    }

    #[tokio::test]
    async fn executor_failure_becomes_an_error_reply() {
        let mut executor = MockExecutor::new();
        executor
            .expect_exec()
            .returning(|_| Err(ExecutionError::from("bad input")));

        let reply = run_executor(&executor, b"ping".to_vec()).await;
        assert_eq!(reply, br#"{"error":"bad input"}"#);
    }
}
