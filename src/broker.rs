//! The broker client seam and its `lapin` implementation.

use crate::error::BrokerError;
use crate::handler::Message;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{BoxStream, StreamExt};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties, ExchangeKind,
};

/// The stream of deliveries of one consumer. It ends when the channel or the
/// connection is closed.
pub type DeliveryStream = BoxStream<'static, Result<Message, BrokerError>>;

/// Opens connections to a broker.
#[async_trait]
pub trait Broker: Send + Sync {
    type Connection: BrokerConnection;

    async fn connect(&self, url: &str) -> Result<Self::Connection, BrokerError>;
}

/// A live connection to the broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    async fn open_channel(&self) -> Result<Self::Channel, BrokerError>;

    /// Closes the connection, which also closes its channels and consumers.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// The channel operations the receiver needs.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares a durable direct exchange.
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError>;

    /// Declares a durable queue and returns its name as reported by the broker.
    async fn declare_queue(&self, queue: &str) -> Result<String, BrokerError>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError>;

    /// Starts a manual-ack consumer on the queue.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;
}

/// [`Broker`] backed by `lapin`.
#[derive(Clone, Default)]
pub struct LapinBroker {
    properties: ConnectionProperties,
}

impl LapinBroker {
    /// Uses custom connection properties, e.g. to run `lapin` on another executor.
    pub fn with_properties(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

#[async_trait]
impl Broker for LapinBroker {
    type Connection = Connection;

    async fn connect(&self, url: &str) -> Result<Connection, BrokerError> {
        Ok(Connection::connect(url, self.properties.clone()).await?)
    }
}

#[async_trait]
impl BrokerConnection for Connection {
    type Channel = Channel;

    async fn open_channel(&self) -> Result<Channel, BrokerError> {
        Ok(self.create_channel().await?)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Connection::close(self, 200, "Receiver stopped").await?;
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for Channel {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        self.exchange_declare(
            exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<String, BrokerError> {
        let declared = self
            .queue_declare(
                queue,
                QueueDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
        Ok(declared.name().as_str().to_string())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        let consumer = self
            .basic_consume(queue, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await?;
        let consumer_tag = consumer.tag().as_str().to_string();

        let deliveries = StreamExt::map(consumer, move |delivery| -> Result<Message, BrokerError> {
            let delivery = delivery?;
            Ok(Message {
                delivery_tag: delivery.delivery_tag,
                consumer_tag: consumer_tag.clone(),
                exchange: delivery.exchange.as_str().to_string(),
                routing_key: delivery.routing_key.as_str().to_string(),
                redelivered: delivery.redelivered,
                received_at: Utc::now(),
                data: delivery.data,
            })
        });
        Ok(deliveries.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.basic_ack(delivery_tag, BasicAckOptions::default()).await?;
        Ok(())
    }
}
