//! # AMQP Receiver
//! A RabbitMQ consumer that declares its own topology, acknowledges every
//! delivery before handing it over, and reconnects with a linear backoff
//! whenever the broker cannot be reached.

pub mod backoff;
pub mod broker;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod receiver;
pub mod url;

// Re-export key components for easy access
pub use backoff::ReconnectPolicy;
pub use broker::{Broker, BrokerChannel, BrokerConnection, DeliveryStream, LapinBroker};
pub use config::{ReceiverConfig, ReceiverConfigBuilder};
pub use error::{BrokerError, ReceiverError};
pub use handler::{DeliveryHandler, Message};
pub use logging::{FacadeSink, LogSink};
pub use receiver::{AmqpReceiver, ReceiverState};
pub use url::{obtain_url, ConnectionParams};
