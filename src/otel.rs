// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Utilities for carrying trace context across the broker: extracting the
//! caller's context from incoming request headers, opening a server-side span
//! per delivery, and injecting the active context into reply headers.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, LongString, ShortString},
};
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::error;

/// An adapter for injecting and extracting OpenTelemetry context from AMQP
/// message headers.
pub(crate) struct RabbitMQTracePropagator<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> RabbitMQTracePropagator<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for RabbitMQTracePropagator<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            ShortString::from(key.to_lowercase()),
            AMQPValue::LongString(LongString::from(value)),
        );
    }
}

impl Extractor for RabbitMQTracePropagator<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        match self.headers.get(key) {
            Some(AMQPValue::LongString(value)) => match std::str::from_utf8(value.as_bytes()) {
                Ok(value) => Some(value),
                Err(err) => {
                    error!("error decoding header value {:?}", err);
                    None
                }
            },
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|key| key.as_str()).collect()
    }
}

/// Opens a new span for processing one inbound request.
///
/// The caller's trace context is extracted from the message headers; the
/// returned context is later injected into the reply so the round trip shows
/// up as one trace.
pub(crate) fn new_span(
    props: &AMQPProperties,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let mut headers = props.headers().clone().unwrap_or_default().inner().clone();
    let ctx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&RabbitMQTracePropagator::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Server)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
