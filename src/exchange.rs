// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Management
//!
//! Types for defining the exchange the RPC server receives requests on.
//! The server declares a single exchange at setup time; if the exchange
//! already exists on the broker, the declared kind must match the existing
//! one or the broker rejects the declaration.

/// The exchange types of AMQP 0-9-1.
///
/// `Fanout` broadcasts to every bound queue regardless of routing key,
/// `Direct` matches routing keys exactly, `Topic` matches them against
/// wildcard patterns, and `Headers` routes on header values instead.
///
/// `Fanout` is the default: the RPC server binds its queue with no routing
/// key, so fan-out semantics are what a fresh deployment gets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Fanout,
    Direct,
    Topic,
    Headers,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

/// Declaration parameters of the request exchange, configured through the
/// builder methods.
#[derive(Debug, Clone)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) internal: bool,
    pub(crate) no_wait: bool,
}

impl ExchangeDefinition {
    /// Creates a definition with the given name; a non-durable fanout
    /// exchange by default.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Fanout,
            delete: false,
            durable: false,
            passive: false,
            internal: false,
            no_wait: false,
        }
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Marks the exchange durable so it survives a broker restart.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Lets the broker delete the exchange once no queue is bound anymore.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Only checks for existence instead of creating the exchange.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_kind_is_fanout() {
        assert_eq!(ExchangeKind::default(), ExchangeKind::Fanout);
        assert_eq!(ExchangeDefinition::new("rpc").kind, ExchangeKind::Fanout);
    }

    #[test]
    fn kind_converts_to_lapin() {
        assert_eq!(
            lapin::ExchangeKind::from(ExchangeKind::Fanout),
            lapin::ExchangeKind::Fanout
        );
        assert_eq!(
            lapin::ExchangeKind::from(ExchangeKind::Topic),
            lapin::ExchangeKind::Topic
        );
    }

    #[test]
    fn builder_flags() {
        let def = ExchangeDefinition::new("rpc")
            .kind(ExchangeKind::Direct)
            .durable();
        assert_eq!(def.name, "rpc");
        assert_eq!(def.kind, ExchangeKind::Direct);
        assert!(def.durable);
        assert!(!def.delete);
    }
}
