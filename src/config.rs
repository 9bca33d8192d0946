//! Receiver configuration and its builder.

use crate::backoff::ReconnectPolicy;
use crate::error::ReceiverError;
use crate::logging::LogSink;
use crate::url::ConnectionParams;
use std::fmt;
use std::sync::Arc;

/// Configuration for an [`AmqpReceiver`](crate::AmqpReceiver).
///
/// Use [`ReceiverConfig::builder`] to construct it. The values are fixed once built.
#[derive(Clone)]
pub struct ReceiverConfig {
    /// The direct exchange the queue is bound to.
    pub exchange: String,
    /// The durable queue to consume from.
    pub queue: String,
    /// The routing key of the binding between the exchange and the queue.
    pub routing_key: String,
    /// The AMQP URL of the broker.
    pub url: String,
    /// The consumer identifier registered on the queue.
    pub consumer_tag: String,
    /// Delay and escalation policy for reconnect attempts.
    pub reconnect_policy: ReconnectPolicy,
    /// Where lifecycle logs go. `None` silences the receiver.
    pub logger: Option<Arc<dyn LogSink>>,
}

impl ReceiverConfig {
    /// Creates a builder with the three required topology names.
    pub fn builder(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> ReceiverConfigBuilder {
        ReceiverConfigBuilder::new(exchange.into(), queue.into(), routing_key.into())
    }
}

impl fmt::Debug for ReceiverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverConfig")
            .field("exchange", &self.exchange)
            .field("queue", &self.queue)
            .field("routing_key", &self.routing_key)
            .field("url", &crate::url::redact(&self.url))
            .field("consumer_tag", &self.consumer_tag)
            .field("reconnect_policy", &self.reconnect_policy)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// A builder for [`ReceiverConfig`].
pub struct ReceiverConfigBuilder {
    exchange: String,
    queue: String,
    routing_key: String,
    url: Option<String>,
    connection_params: Option<ConnectionParams>,
    consumer_tag: Option<String>,
    reconnect_policy: Option<ReconnectPolicy>,
    logger: Option<Arc<dyn LogSink>>,
}

impl ReceiverConfigBuilder {
    fn new(exchange: String, queue: String, routing_key: String) -> Self {
        Self {
            exchange,
            queue,
            routing_key,
            url: None,
            connection_params: None,
            consumer_tag: None,
            reconnect_policy: None,
            logger: None,
        }
    }

    /// Sets the broker URL, taking precedence over [`connection_params`](Self::connection_params).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Derives the broker URL from discrete parameters.
    /// Defaults to `ConnectionParams::default()` when neither this nor `url` is set.
    pub fn connection_params(mut self, params: ConnectionParams) -> Self {
        self.connection_params = Some(params);
        self
    }

    /// Defaults to `{queue}_consumer`.
    pub fn consumer_tag(mut self, consumer_tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(consumer_tag.into());
        self
    }

    /// Defaults to `ReconnectPolicy::default()`.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = Some(policy);
        self
    }

    pub fn logger(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.logger = Some(sink);
        self
    }

    /// Builds the configuration, rejecting empty topology names.
    pub fn build(self) -> Result<ReceiverConfig, ReceiverError> {
        for (field, value) in [
            ("exchange", &self.exchange),
            ("queue", &self.queue),
            ("routing key", &self.routing_key),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} must not be empty", field).into());
            }
        }

        let url = match self.url {
            Some(url) => url,
            None => self.connection_params.unwrap_or_default().url(),
        };

        let queue = self.queue;
        Ok(ReceiverConfig {
            consumer_tag: self.consumer_tag.unwrap_or_else(|| format!("{}_consumer", queue)),
            reconnect_policy: self.reconnect_policy.unwrap_or_default(),
            logger: self.logger,
            exchange: self.exchange,
            queue,
            routing_key: self.routing_key,
            url,
        })
    }
}
