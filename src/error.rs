use std::fmt;
use thiserror::Error;

/// A failure reported by the broker client, normalized to a short code.
///
/// For socket-level failures the code is the `io::ErrorKind` name (for example
/// `ConnectionRefused`); for AMQP protocol failures it is the broker reply code
/// (for example `403` or `406`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    pub code: String,
    pub message: String,
}

impl BrokerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.message)
    }
}

impl std::error::Error for BrokerError {}

impl From<lapin::Error> for BrokerError {
    fn from(error: lapin::Error) -> Self {
        let code = match &error {
            lapin::Error::IOError(io) => format!("{:?}", io.kind()),
            lapin::Error::ProtocolError(amqp) => amqp.get_id().to_string(),
            other => other.to_string(),
        };
        BrokerError::new(code, error.to_string())
    }
}

/// Error type for the receiver.
///
/// Only the fatal variants ever leave [`AmqpReceiver::start`](crate::AmqpReceiver::start);
/// `ConnectTransient` is handled by the reconnect loop and shows up in logs only.
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// The broker could not be reached. Retried with backoff.
    #[error("Connection attempt failed: {code}")]
    ConnectTransient { code: String },

    /// A channel could not be opened on a live connection.
    #[error("Channel creation attempt failed: {code}")]
    ChannelFatal { code: String },

    /// The exchange could not be declared, usually a type or durability mismatch.
    #[error("Exchange declaration attempt failed: {code}")]
    ExchangeFatal { code: String },

    /// The queue could not be declared, usually conflicting properties on an existing queue.
    #[error("Queue declaration attempt failed: {code}")]
    QueueFatal { code: String },

    /// The queue could not be bound to the exchange.
    #[error("Queue binding attempt failed: {code}")]
    BindFatal { code: String },

    /// The receiver configuration is unusable.
    #[error("Invalid receiver configuration: {message}")]
    InvalidConfig { message: String },
}

impl ReceiverError {
    /// Whether the reconnect loop gives up on this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReceiverError::ConnectTransient { .. })
    }

    /// The broker-reported code, if the error came from the broker.
    pub fn code(&self) -> Option<&str> {
        match self {
            ReceiverError::ConnectTransient { code }
            | ReceiverError::ChannelFatal { code }
            | ReceiverError::ExchangeFatal { code }
            | ReceiverError::QueueFatal { code }
            | ReceiverError::BindFatal { code } => Some(code),
            ReceiverError::InvalidConfig { .. } => None,
        }
    }
}

impl From<&str> for ReceiverError {
    fn from(s: &str) -> Self {
        ReceiverError::InvalidConfig { message: s.to_string() }
    }
}

impl From<String> for ReceiverError {
    fn from(s: String) -> Self {
        ReceiverError::InvalidConfig { message: s }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    #[test]
    fn test_io_errors_use_kind_as_code() {
        let error = lapin::Error::IOError(Arc::new(io::Error::from(io::ErrorKind::ConnectionRefused)));
        let broker_error = BrokerError::from(error);
        assert_eq!(broker_error.code, "ConnectionRefused");
    }

    #[test]
    fn test_only_connect_errors_are_retryable() {
        let code = "ECONNREFUSED".to_string();
        assert!(!ReceiverError::ConnectTransient { code: code.clone() }.is_fatal());
        assert!(ReceiverError::ChannelFatal { code: "403".into() }.is_fatal());
        assert!(ReceiverError::QueueFatal { code: "406".into() }.is_fatal());
        assert!(ReceiverError::ExchangeFatal { code: "406".into() }.is_fatal());
        assert!(ReceiverError::BindFatal { code: "404".into() }.is_fatal());
        assert!(ReceiverError::from("empty queue").is_fatal());
    }

    #[test]
    fn test_messages_carry_the_code() {
        let error = ReceiverError::QueueFatal { code: "406".into() };
        assert_eq!(error.to_string(), "Queue declaration attempt failed: 406");
        assert_eq!(error.code(), Some("406"));
        assert_eq!(ReceiverError::from("bad").code(), None);
    }
}
