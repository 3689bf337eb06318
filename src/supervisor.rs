// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Supervisor
//!
//! The supervisor keeps exactly one connection/channel pair alive at a time.
//! A dedicated worker task owns the link and drives the consumer stream; when
//! the link dies while the stop flag is unset, the supervisor classifies the
//! closure and decides whether to open a replacement according to the
//! reconnection policy. Exhausting the policy is terminal and produces the
//! single fatal error the server ever surfaces.
//!
//! The worker's only event sources are the consumer stream and the stop flag,
//! both consumed from one task, so channel state is never mutated from two
//! places at once.

use crate::{
    channel::new_amqp_channel,
    config::ServerConfig,
    consumer::consume,
    errors::AmqpError,
    handler::{ContentValidator, Executor},
    publisher::ReplyPublisher,
    topology::RpcTopology,
};
use futures_util::StreamExt;
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions},
    types::FieldTable,
    Channel, Connection, Consumer,
};
use opentelemetry::global;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{oneshot, watch, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Fixed wait between reconnection attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// AMQP reply code announced on an intentional connection close
const CLOSE_REPLY_SUCCESS: u16 = 200;

/// Observable lifecycle of the supervisor.
///
/// `Connecting` covers the whole setup pipeline up to the consumer being
/// declared; `Running` means deliveries are flowing; `Reconnecting` is the
/// fixed-delay wait between a closure and the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Running,
    Reconnecting,
    Stopping,
    Stopped,
}

/// Why the link to the broker went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClosureReason {
    /// The broker closed the channel or cancelled the consumer
    Broker,
    /// The server closed the link itself during shutdown
    Client,
    /// The link died for a reason that could not be classified
    Unclassified,
}

impl ClosureReason {
    /// Only an intentional client-side close is terminal; unclassified
    /// closures reconnect, same as broker-initiated ones.
    pub(crate) fn reconnect_eligible(&self) -> bool {
        !matches!(self, ClosureReason::Client)
    }
}

/// Classifies the end of a consumer stream.
///
/// Broker-sent close frames surface as protocol errors; the stream draining
/// without an error while the stop flag is unset means the broker cancelled
/// the consumer.
pub(crate) fn classify_closure(stopping: bool, error: Option<&lapin::Error>) -> ClosureReason {
    if stopping {
        return ClosureReason::Client;
    }

    match error {
        Some(lapin::Error::ProtocolError(_)) => ClosureReason::Broker,
        Some(_) => ClosureReason::Unclassified,
        None => ClosureReason::Broker,
    }
}

/// Bounds disconnect-driven reconnection.
///
/// The counter increments once per cycle, never exceeds the bound, and is
/// never reset while the process lives.
#[derive(Debug)]
pub(crate) struct ReconnectionPolicy {
    max_attempts: u32,
    current_attempts: u32,
}

impl ReconnectionPolicy {
    pub(crate) fn new(max_attempts: u32) -> ReconnectionPolicy {
        ReconnectionPolicy {
            max_attempts,
            current_attempts: 0,
        }
    }

    /// Claims one more attempt. Returns false once the bound is reached.
    pub(crate) fn register_attempt(&mut self) -> bool {
        if self.current_attempts < self.max_attempts {
            self.current_attempts += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.current_attempts
    }
}

/// The live link owned by the worker, kept so `stop` can cancel the consumer
/// and close the connection gracefully.
struct ActiveLink {
    connection: Arc<Connection>,
    channel: Arc<Channel>,
    consumer_tag: String,
}

/// Supervises one connection/channel pair and its worker task.
pub struct Supervisor {
    config: ServerConfig,
    executor: Arc<dyn Executor>,
    validator: Option<Arc<dyn ContentValidator>>,
    stop: Arc<AtomicBool>,
    link: Arc<Mutex<Option<ActiveLink>>>,
    state: Arc<watch::Sender<SupervisorState>>,
    worker: Option<JoinHandle<Result<(), AmqpError>>>,
}

impl Supervisor {
    /// Creates an idle supervisor for the given configuration and seams.
    pub fn new(
        config: ServerConfig,
        executor: Arc<dyn Executor>,
        validator: Option<Arc<dyn ContentValidator>>,
    ) -> Supervisor {
        let (state, _) = watch::channel(SupervisorState::Idle);

        Supervisor {
            config,
            executor,
            validator,
            stop: Arc::new(AtomicBool::new(false)),
            link: Arc::new(Mutex::new(None)),
            state: Arc::new(state),
            worker: None,
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Spawns the worker task and blocks until the setup pipeline reaches
    /// consuming, or the reconnection policy exhausts first.
    ///
    /// # Returns
    /// Ok(()) once deliveries can flow, or the fatal
    /// `MaxReconnectionAttemptsReached` error.
    pub async fn start(&mut self) -> Result<(), AmqpError> {
        let (ready_tx, ready_rx) = oneshot::channel();

        let worker = WorkerContext {
            config: self.config.clone(),
            executor: self.executor.clone(),
            validator: self.validator.clone(),
            stop: self.stop.clone(),
            link: self.link.clone(),
            state: self.state.clone(),
        };

        self.worker = Some(tokio::spawn(worker.run(ready_tx)));

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                if let Some(handle) = self.worker.take() {
                    let _ = handle.await;
                }
                Err(err)
            }
            Err(_) => Err(AmqpError::InternalError),
        }
    }

    /// Stops the worker: sets the stop flag, cancels the active consumer,
    /// closes the connection gracefully and joins the worker task.
    ///
    /// Idempotent; calling twice has no additional effect. A fatal error the
    /// worker recorded after a successful `start` is returned from here.
    pub async fn stop(&mut self) -> Result<(), AmqpError> {
        if !self.stop.swap(true, Ordering::SeqCst) {
            self.state.send_replace(SupervisorState::Stopping);
            info!("the server is stopping and closing the connection to the message broker");

            if let Some(link) = self.link.lock().await.take() {
                debug!("cancelling the active consumer");
                if let Err(err) = link
                    .channel
                    .basic_cancel(&link.consumer_tag, BasicCancelOptions::default())
                    .await
                {
                    warn!(error = err.to_string(), "error whiling cancelling the consumer");
                }

                debug!("closing the connection to the message broker");
                if let Err(err) = link
                    .connection
                    .close(CLOSE_REPLY_SUCCESS, "server shutdown")
                    .await
                {
                    warn!(error = err.to_string(), "error whiling closing the connection");
                }
            }
        }

        let result = match self.worker.take() {
            Some(handle) => match handle.await {
                Ok(res) => res,
                Err(_) => Err(AmqpError::InternalError),
            },
            None => Ok(()),
        };

        self.state.send_replace(SupervisorState::Stopped);
        result
    }
}

/// Everything the worker task owns; the supervisor only keeps shared handles.
struct WorkerContext {
    config: ServerConfig,
    executor: Arc<dyn Executor>,
    validator: Option<Arc<dyn ContentValidator>>,
    stop: Arc<AtomicBool>,
    link: Arc<Mutex<Option<ActiveLink>>>,
    state: Arc<watch::Sender<SupervisorState>>,
}

impl WorkerContext {
    /// The reconnecting loop: one iteration per connection lifetime.
    async fn run(self, ready: oneshot::Sender<Result<(), AmqpError>>) -> Result<(), AmqpError> {
        let mut ready = Some(ready);
        let mut policy = ReconnectionPolicy::new(self.config.max_reconnection_attempts);

        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }

            self.state.send_replace(SupervisorState::Connecting);

            match self.open_link().await {
                Ok((consumer, channel)) => {
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }
                    self.state.send_replace(SupervisorState::Running);
                    info!("connection successfully established and configured, enabling the message consumption");

                    let reason = self.drive(consumer, channel).await;
                    self.link.lock().await.take();

                    if !reason.reconnect_eligible() {
                        debug!("the link was closed intentionally, not reconnecting");
                        return Ok(());
                    }
                    if self.stop.load(Ordering::SeqCst) {
                        return Ok(());
                    }

                    warn!(
                        reason = format!("{:?}", reason),
                        "the link to the message broker was closed unexpectedly"
                    );
                }
                Err(err) => {
                    if self.stop.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    error!(
                        error = err.to_string(),
                        "failed to establish the link to the message broker"
                    );
                }
            }

            if !policy.register_attempt() {
                let err = AmqpError::MaxReconnectionAttemptsReached(policy.attempts());
                error!(
                    "unable to reconnect to the message broker, the maximum amount of \
                     reconnection attempts was reached"
                );
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(err.clone()));
                }
                self.state.send_replace(SupervisorState::Stopped);
                return Err(err);
            }

            self.state.send_replace(SupervisorState::Reconnecting);
            info!(
                "waiting {}s before opening a new connection to the message broker",
                RECONNECT_DELAY.as_secs()
            );
            sleep(RECONNECT_DELAY).await;
        }
    }

    /// Opens a fresh connection and channel, installs the topology and
    /// declares the consumer. Each step is gated on the previous one.
    async fn open_link(&self) -> Result<(Consumer, Arc<Channel>), AmqpError> {
        let (connection, channel) = new_amqp_channel(&self.config).await?;

        RpcTopology::new(channel.clone(), &self.config).install().await?;

        let consumer_tag = format!("{}-{}", self.config.queue_name, Uuid::new_v4());
        let consumer = match channel
            .basic_consume(
                &self.config.queue_name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(
                    self.config.queue_name.clone(),
                ))
            }
            Ok(c) => Ok(c),
        }?;

        *self.link.lock().await = Some(ActiveLink {
            connection,
            channel: channel.clone(),
            consumer_tag,
        });

        Ok((consumer, channel))
    }

    /// Drives the consumer stream until it ends, processing one delivery at a
    /// time, then classifies why it ended.
    async fn drive(&self, mut consumer: Consumer, channel: Arc<Channel>) -> ClosureReason {
        let tracer = global::tracer("amqp-rpc-server");
        let publisher = ReplyPublisher::new(channel);
        let mut failure: Option<lapin::Error> = None;

        while let Some(result) = consumer.next().await {
            match result {
                Ok(delivery) => {
                    if let Err(err) = consume(
                        &tracer,
                        &delivery,
                        &self.executor,
                        self.validator.as_ref(),
                        &publisher,
                    )
                    .await
                    {
                        error!(error = err.to_string(), "error consume msg");
                    }
                }

                Err(err) => {
                    error!(error = err.to_string(), "errors consume msg");
                    failure = Some(err);
                    break;
                }
            }
        }

        classify_closure(self.stop.load(Ordering::SeqCst), failure.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ExecutionError;

    #[test]
    fn policy_counts_each_cycle_and_stops_at_the_bound() {
        let mut policy = ReconnectionPolicy::new(2);

        assert!(policy.register_attempt());
        assert_eq!(policy.attempts(), 1);
        assert!(policy.register_attempt());
        assert_eq!(policy.attempts(), 2);

        // terminal: the counter never exceeds the bound
        assert!(!policy.register_attempt());
        assert!(!policy.register_attempt());
        assert_eq!(policy.attempts(), 2);
    }

    #[test]
    fn policy_with_zero_attempts_is_terminal_immediately() {
        let mut policy = ReconnectionPolicy::new(0);
        assert!(!policy.register_attempt());
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn intentional_closures_are_terminal() {
        assert_eq!(classify_closure(true, None), ClosureReason::Client);
        assert!(!ClosureReason::Client.reconnect_eligible());
    }

    #[test]
    fn broker_cancellation_is_reconnect_eligible() {
        let reason = classify_closure(false, None);
        assert_eq!(reason, ClosureReason::Broker);
        assert!(reason.reconnect_eligible());
        assert!(ClosureReason::Unclassified.reconnect_eligible());
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let cfg = ServerConfig::new("amqp://localhost:5672", "orders");
        let executor: Arc<dyn Executor> =
            Arc::new(|body: Vec<u8>| async move { Ok::<_, ExecutionError>(body) });

        let mut supervisor = Supervisor::new(cfg, executor, None);
        assert_eq!(supervisor.state(), SupervisorState::Idle);

        assert!(supervisor.stop().await.is_ok());
        assert!(supervisor.stop().await.is_ok());
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }
}
