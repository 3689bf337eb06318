// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Setup Pipeline
//!
//! This module brings a freshly opened channel to the point where consuming
//! can start. The steps run strictly in order, each one gated on the success
//! of the previous one:
//!
//! 1. declare the exchange (with the configured kind)
//! 2. declare the request queue (durable, non-exclusive, not auto-deleted)
//! 3. bind the queue to the exchange with an empty routing key
//! 4. set the prefetch quality of service to one
//!
//! A failure in any step maps to a classified `AmqpError` and is reported to
//! the supervisor, never swallowed.

use crate::{
    config::ServerConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use lapin::{
    options::{BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

/// At most one unacknowledged delivery outstanding per channel. The broker
/// holds further deliveries until the current one is acked or rejected, which
/// is what makes message processing strictly sequential.
pub(crate) const PREFETCH_COUNT: u16 = 1;

/// Builds the exchange, queue and binding definitions for one server
/// configuration.
pub(crate) fn request_topology(
    cfg: &ServerConfig,
) -> (ExchangeDefinition, QueueDefinition, QueueBinding) {
    let exchange = ExchangeDefinition::new(&cfg.exchange_name).kind(cfg.exchange_kind.clone());
    let queue = QueueDefinition::new(&cfg.queue_name).durable();
    let binding = QueueBinding::new(&cfg.queue_name).exchange(&cfg.exchange_name);

    (exchange, queue, binding)
}

/// Installs the request topology on one channel.
pub struct RpcTopology {
    channel: Arc<Channel>,
    exchange: ExchangeDefinition,
    queue: QueueDefinition,
    binding: QueueBinding,
}

impl RpcTopology {
    /// Creates the topology for the given configuration on the given channel.
    pub fn new(channel: Arc<Channel>, cfg: &ServerConfig) -> RpcTopology {
        let (exchange, queue, binding) = request_topology(cfg);

        RpcTopology {
            channel,
            exchange,
            queue,
            binding,
        }
    }

    /// Runs the ordered setup steps.
    ///
    /// # Returns
    /// Ok(()) once the channel is ready for `basic_consume`, or the error of
    /// the first step that failed.
    pub async fn install(&self) -> Result<(), AmqpError> {
        self.declare_exchange().await?;
        self.declare_queue().await?;
        self.bind_queue().await?;
        self.configure_qos().await
    }

    async fn declare_exchange(&self) -> Result<(), AmqpError> {
        debug!("declaring exchange: {}", self.exchange.name);

        match self
            .channel
            .exchange_declare(
                &self.exchange.name,
                self.exchange.kind.clone().into(),
                ExchangeDeclareOptions {
                    passive: self.exchange.passive,
                    durable: self.exchange.durable,
                    auto_delete: self.exchange.delete,
                    internal: self.exchange.internal,
                    nowait: self.exchange.no_wait,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = self.exchange.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(self.exchange.name.clone()))
            }
            _ => {
                debug!("exchange: {} was declared", self.exchange.name);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self) -> Result<(), AmqpError> {
        debug!("declaring queue: {}", self.queue.name);

        match self
            .channel
            .queue_declare(
                &self.queue.name,
                QueueDeclareOptions {
                    passive: self.queue.passive,
                    durable: self.queue.durable,
                    exclusive: self.queue.exclusive,
                    auto_delete: self.queue.delete,
                    nowait: self.queue.no_wait,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = self.queue.name,
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(self.queue.name.clone()))
            }
            _ => {
                debug!("queue: {} was declared", self.queue.name);
                Ok(())
            }
        }
    }

    async fn bind_queue(&self) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {}",
            self.binding.queue_name, self.binding.exchange_name
        );

        match self
            .channel
            .queue_bind(
                &self.binding.queue_name,
                &self.binding.exchange_name,
                &self.binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");

                Err(AmqpError::BindingExchangeToQueueError(
                    self.binding.exchange_name.clone(),
                    self.binding.queue_name.clone(),
                ))
            }
            _ => {
                debug!("queue was bound");
                Ok(())
            }
        }
    }

    async fn configure_qos(&self) -> Result<(), AmqpError> {
        debug!("setting prefetch count to {}", PREFETCH_COUNT);

        match self
            .channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions { global: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to configure qos");
                Err(AmqpError::QoSDeclarationError(err.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeKind;

    #[test]
    fn request_topology_matches_the_wire_contract() {
        let cfg = ServerConfig::new("amqp://localhost:5672", "orders")
            .queue_name("orders-rpc")
            .exchange_kind(ExchangeKind::Fanout);

        let (exchange, queue, binding) = request_topology(&cfg);

        assert_eq!(exchange.name, "orders");
        assert_eq!(exchange.kind, ExchangeKind::Fanout);

        // durable, non-exclusive, not auto-deleted
        assert_eq!(queue.name, "orders-rpc");
        assert!(queue.durable);
        assert!(!queue.exclusive);
        assert!(!queue.delete);

        // empty routing key: fan-out semantics
        assert_eq!(binding.queue_name, "orders-rpc");
        assert_eq!(binding.exchange_name, "orders");
        assert_eq!(binding.routing_key, "");
    }
}
