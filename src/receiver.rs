//! The receiver: connection lifecycle, topology declaration and consumption.

use crate::broker::{Broker, BrokerChannel, BrokerConnection, LapinBroker};
use crate::config::ReceiverConfig;
use crate::error::{BrokerError, ReceiverError};
use crate::handler::DeliveryHandler;
use crate::logging::Logger;
use crate::url::redact;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Lifecycle states of a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverState {
    Idle,
    Connecting,
    ChannelOpening,
    DeclaringTopology,
    Consuming,
    Reconnecting,
    Stopped,
}

impl ReceiverState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, ReceiverState::Stopped)
    }
}

/// How a consumption session ended, when it did not end fatally.
enum Session {
    Stopped,
    Lost(BrokerError),
}

/// Keeps a consumer attached to a queue, reconnecting whenever the broker
/// cannot be reached.
///
/// The receiver declares a durable direct exchange, a durable queue and the
/// binding between them, then hands every delivery to a [`DeliveryHandler`]
/// after acknowledging it. Connection failures are retried forever with the
/// configured [`ReconnectPolicy`](crate::ReconnectPolicy); channel and
/// topology failures end [`start`](Self::start) with an error.
///
/// Share it through an `Arc` to call [`stop`](Self::stop) from another task.
pub struct AmqpReceiver<B: Broker = LapinBroker> {
    config: ReceiverConfig,
    broker: B,
    logger: Logger,
    attempt_no: AtomicU32,
    connection: Mutex<Option<Arc<B::Connection>>>,
    state: watch::Sender<ReceiverState>,
}

impl AmqpReceiver<LapinBroker> {
    /// Creates a receiver that talks to the broker through `lapin`.
    pub fn new(config: ReceiverConfig) -> Self {
        Self::with_broker(config, LapinBroker::default())
    }
}

impl<B: Broker> AmqpReceiver<B> {
    pub fn with_broker(config: ReceiverConfig, broker: B) -> Self {
        let logger = Logger::new(config.logger.clone());
        let (state, _) = watch::channel(ReceiverState::Idle);
        Self {
            config,
            broker,
            logger,
            attempt_no: AtomicU32::new(1),
            connection: Mutex::new(None),
            state,
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn state(&self) -> ReceiverState {
        *self.state.borrow()
    }

    /// Returns a receiver notified on every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ReceiverState> {
        self.state.subscribe()
    }

    /// The number of the next connect attempt. Back to 1 after every
    /// successful topology setup.
    pub fn attempt_no(&self) -> u32 {
        self.attempt_no.load(Ordering::SeqCst)
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Connects, declares the topology and consumes until [`stop`](Self::stop)
    /// is called or a fatal error occurs.
    ///
    /// Every message is acknowledged before `handler` sees it, so a handler
    /// failure never causes a redelivery. Call this once per receiver.
    ///
    /// # Errors
    /// Returns the fatal [`ReceiverError`] that ended the receiver: a channel
    /// that could not be opened, or an exchange, queue or binding that could
    /// not be declared. Connection failures are never returned, nor are
    /// failures caused by a concurrent [`stop`](Self::stop).
    pub async fn start<H: DeliveryHandler>(&self, handler: H) -> Result<(), ReceiverError> {
        let policy = self.config.reconnect_policy.clone();

        loop {
            if !self.enter(ReceiverState::Connecting) {
                return Ok(());
            }

            self.logger.info(&format!("Trying to connect, attempt no {}", self.attempt_no()));
            let attempt_no = self.attempt_no.fetch_add(1, Ordering::SeqCst) + 1;
            self.logger.info(&format!("Connecting to {}", redact(&self.config.url)));

            let connection = match self.broker.connect(&self.config.url).await {
                Ok(connection) => Arc::new(connection),
                Err(e) => {
                    self.logger.warn(&ReceiverError::ConnectTransient { code: e.code }.to_string());
                    if policy.should_escalate(attempt_no) {
                        self.logger.error(&format!(
                            "Connection attempt failed {} times consecutively",
                            attempt_no - 1
                        ));
                    }
                    if self.back_off(policy.reconnect_delay(attempt_no)).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            *self.connection.lock().await = Some(connection.clone());
            self.logger.info("Connection opened");
            if self.state().is_stopped() {
                self.release_connection().await;
                return Ok(());
            }

            match self.run_session(connection.as_ref(), &handler).await {
                Ok(Session::Stopped) => return Ok(()),
                Ok(Session::Lost(e)) => {
                    self.logger.warn(&format!("Connection lost while consuming: {}", e.code));
                    self.release_connection().await;
                    if self.back_off(policy.reconnect_delay(self.attempt_no())).await {
                        return Ok(());
                    }
                }
                Err(_) if self.state().is_stopped() => {
                    self.release_connection().await;
                    return Ok(());
                }
                Err(fatal) => {
                    self.logger.error(&fatal.to_string());
                    self.state.send_replace(ReceiverState::Stopped);
                    self.release_connection().await;
                    return Err(fatal);
                }
            }
        }
    }

    /// Closes the connection if one is open and moves to `Stopped`.
    ///
    /// Also cancels a pending reconnect. Safe to call more than once.
    pub async fn stop(&self) {
        self.state.send_replace(ReceiverState::Stopped);

        let connection = self.connection.lock().await.take();
        match connection {
            Some(connection) => {
                self.logger.info("Closing connection");
                if let Err(e) = connection.close().await {
                    self.logger.warn(&format!("Connection close failed: {}", e.code));
                }
                self.logger.info("Connection closed");
            }
            None => self.logger.warn("There is no connection started"),
        }
    }

    /// Opens a channel, declares the topology and consumes on it.
    async fn run_session<H: DeliveryHandler>(
        &self,
        connection: &B::Connection,
        handler: &H,
    ) -> Result<Session, ReceiverError> {
        if !self.enter(ReceiverState::ChannelOpening) {
            return Ok(Session::Stopped);
        }
        self.logger.info("Creating a new channel");
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ReceiverError::ChannelFatal { code: e.code })?;
        self.logger.info("Channel opened");

        if !self.enter(ReceiverState::DeclaringTopology) {
            return Ok(Session::Stopped);
        }
        let queue = self.declare_topology(&channel).await?;
        self.attempt_no.store(1, Ordering::SeqCst);

        let mut deliveries = match channel.consume(&queue, &self.config.consumer_tag).await {
            Ok(deliveries) => deliveries,
            Err(e) => return Ok(Session::Lost(e)),
        };
        if !self.enter(ReceiverState::Consuming) {
            return Ok(Session::Stopped);
        }
        self.logger.info(&format!("Consuming from {} as {}", queue, self.config.consumer_tag));

        let mut state = self.state.subscribe();
        loop {
            let delivery = tokio::select! {
                biased;
                _ = until_stopped(&mut state) => return Ok(Session::Stopped),
                delivery = deliveries.next() => delivery,
            };

            let message = match delivery {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Ok(Session::Lost(e)),
                None => {
                    return Ok(Session::Lost(BrokerError::new(
                        "ConsumerClosed",
                        "the delivery stream ended",
                    )))
                }
            };

            self.logger.info(&format!(
                "Received message {} from {}",
                message.delivery_tag, message.consumer_tag
            ));
            self.logger.info(&format!("Acknowledging message {}", message.delivery_tag));
            if let Err(e) = channel.ack(message.delivery_tag).await {
                return Ok(Session::Lost(e));
            }

            handler.handle(message).await;
        }
    }

    /// Declares the exchange and the queue and binds them. Returns the queue name.
    async fn declare_topology(
        &self,
        channel: &<B::Connection as BrokerConnection>::Channel,
    ) -> Result<String, ReceiverError> {
        let config = &self.config;

        self.logger.info(&format!("Declaring exchange {}", config.exchange));
        channel
            .declare_exchange(&config.exchange)
            .await
            .map_err(|e| ReceiverError::ExchangeFatal { code: e.code })?;
        self.logger.info("Exchange declared");

        self.logger.info(&format!("Declaring queue {}", config.queue));
        let queue = channel
            .declare_queue(&config.queue)
            .await
            .map_err(|e| ReceiverError::QueueFatal { code: e.code })?;

        self.logger.info(&format!(
            "Binding {} to {} with {}",
            config.exchange, queue, config.routing_key
        ));
        channel
            .bind_queue(&queue, &config.exchange, &config.routing_key)
            .await
            .map_err(|e| ReceiverError::BindFatal { code: e.code })?;
        self.logger.info("Queue bound");

        Ok(queue)
    }

    /// Waits out a reconnect delay. Returns `true` if the receiver was stopped meanwhile.
    async fn back_off(&self, delay: Duration) -> bool {
        if !self.enter(ReceiverState::Reconnecting) {
            return true;
        }
        self.logger.info(&format!("Reconnecting in {} ms", delay.as_millis()));

        let mut state = self.state.subscribe();
        tokio::select! {
            biased;
            _ = until_stopped(&mut state) => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    /// Moves to `next` unless the receiver was stopped. Returns whether it moved.
    fn enter(&self, next: ReceiverState) -> bool {
        let mut entered = false;
        self.state.send_if_modified(|current| {
            if current.is_stopped() {
                return false;
            }
            entered = true;
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        entered
    }

    /// Drops the held connection, closing it if it is still open.
    async fn release_connection(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                self.logger.warn(&format!("Connection close failed: {}", e.code));
            }
        }
    }
}

async fn until_stopped(state: &mut watch::Receiver<ReceiverState>) {
    let _ = state.wait_for(ReceiverState::is_stopped).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_receiver_is_idle() {
        let config = ReceiverConfig::builder("me", "message", "hello").build().unwrap();
        let receiver = AmqpReceiver::new(config);

        assert_eq!(receiver.state(), ReceiverState::Idle);
        assert_eq!(receiver.attempt_no(), 1);
        assert_eq!(receiver.config().queue, "message");
    }

    #[test]
    fn test_enter_never_leaves_stopped() {
        let config = ReceiverConfig::builder("me", "message", "hello").build().unwrap();
        let receiver = AmqpReceiver::new(config);

        assert!(receiver.enter(ReceiverState::Connecting));
        assert!(receiver.enter(ReceiverState::Connecting));
        receiver.state.send_replace(ReceiverState::Stopped);
        assert!(!receiver.enter(ReceiverState::Reconnecting));
        assert_eq!(receiver.state(), ReceiverState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_without_connection_is_idempotent() {
        let config = ReceiverConfig::builder("me", "message", "hello").build().unwrap();
        let receiver = AmqpReceiver::new(config);

        receiver.stop().await;
        receiver.stop().await;

        assert_eq!(receiver.state(), ReceiverState::Stopped);
        assert!(!receiver.is_connected().await);
    }
}
