// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation of AMQP connections and channels. One
//! connection and one channel are opened per supervisor cycle; a fresh
//! connection name is announced to the broker on every attempt so individual
//! links can be told apart in the broker's management view.

use crate::{config::ServerConfig, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Opens a new connection to the message broker and a channel on it.
///
/// The connection is established from the configured DSN; both the connection
/// and the channel are wrapped in `Arc` for sharing with the reply publisher.
///
/// # Parameters
/// * `cfg` - Server configuration carrying the broker DSN
///
/// # Returns
/// * `Result<(Arc<Connection>, Arc<Channel>), AmqpError>` -
///   the connection and channel on success, or an error on failure.
pub async fn new_amqp_channel(
    cfg: &ServerConfig,
) -> Result<(Arc<Connection>, Arc<Channel>), AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.connection_name()));

    let conn = match Connection::connect(&cfg.dsn, options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError)
        }
    }
}
