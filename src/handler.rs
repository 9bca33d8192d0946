//! The message type handed to user code and the handler trait that receives it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A message delivered by the broker.
///
/// It has already been acknowledged by the time a handler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub delivery_tag: u64,
    pub consumer_tag: String,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub received_at: DateTime<Utc>,
    pub data: Vec<u8>,
}

impl Message {
    /// The message body as UTF-8 text, with invalid sequences replaced.
    pub fn body_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// Receives every message consumed from the queue, in delivery order.
///
/// Any closure `Fn(Message)` is a handler; implement the trait directly when
/// the processing is asynchronous. Panics are not caught by the receiver.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, message: Message);
}

#[async_trait]
impl<F> DeliveryHandler for F
where
    F: Fn(Message) + Send + Sync,
{
    async fn handle(&self, message: Message) {
        self(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn message(data: &[u8]) -> Message {
        Message {
            delivery_tag: 7,
            consumer_tag: "message_consumer".to_string(),
            exchange: "me".to_string(),
            routing_key: "hello".to_string(),
            redelivered: false,
            received_at: Utc::now(),
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_closures_are_handlers() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let received = received.clone();
            move |message: Message| received.lock().unwrap().push(message.delivery_tag)
        };

        handler.handle(message(b"hi")).await;

        assert_eq!(*received.lock().unwrap(), vec![7]);
    }

    #[test]
    fn test_body_lossy() {
        assert_eq!(message(b"hello").body_lossy(), "hello");
        assert_eq!(message(&[0x68, 0xff]).body_lossy(), "h\u{fffd}");
    }
}
