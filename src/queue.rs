// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Management
//!
//! Types for defining the request queue of the RPC server and its binding to
//! the exchange. The server uses a single durable, non-exclusive,
//! non-auto-delete queue bound with no routing key.

/// Declaration parameters of the request queue, configured through the
/// builder methods.
#[derive(Debug, Clone, Default)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) no_wait: bool,
}

impl QueueDefinition {
    /// Creates a definition with the given name and standard settings:
    /// non-durable, non-exclusive, not auto-deleted.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    /// Marks the queue durable so it survives a broker restart.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Lets the broker delete the queue once the last consumer goes away.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Restricts the queue to the declaring connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// The routing rule connecting the request queue to the exchange.
///
/// The RPC server binds with an empty routing key, which yields fan-out
/// semantics on the default exchange kind.
#[derive(Debug, Clone)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a binding for the given queue; the exchange name and routing
    /// key start out empty.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Names the exchange the queue is bound to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets a routing key on the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}
