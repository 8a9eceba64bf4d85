use courier_rpc::error::{ErrorPayload, RpcError, UNKNOWN_ERROR};

/// Broker acknowledgement outcome for one delivery.
///
/// Dispatch failures map to an explicit outcome instead of being sniffed from
/// exception classes: everything the broker cannot fix by redelivering is
/// acknowledged, transport trouble is rejected for redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Reject,
}

/// Possible service runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Rpc(#[from] RpcError),

    #[error("Broker transport error: {0}")]
    Transport(#[from] lapin::Error),

    #[error("Handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("Discovery file error: {0}")]
    DiscoveryFile(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: channel closed")]
    ChannelClosed,

    #[error("Not connected")]
    NotConnected,
}

impl Error {
    /// Maps this error to the acknowledgement outcome for the delivery that
    /// produced it.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Transport(_) | Self::Io(_) | Self::ChannelClosed | Self::NotConnected => {
                Disposition::Reject
            }
            _ => Disposition::Ack,
        }
    }
}

/// An application-level failure surfaced by a handler or a middleware.
/// Converted into an `error` envelope when the inbound message was a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{class}: {message}")]
pub struct HandlerError {
    pub class: String,
    pub message: String,
    pub code: i64,
}

impl HandlerError {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            code: UNKNOWN_ERROR,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }
}

impl From<RpcError> for HandlerError {
    fn from(err: RpcError) -> Self {
        Self {
            class: err.kind_name().to_owned(),
            message: err.to_string(),
            code: err.code(),
        }
    }
}

impl From<&HandlerError> for ErrorPayload {
    fn from(err: &HandlerError) -> Self {
        Self::new(err.class.clone(), err.message.clone(), Some(err.code))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transport_errors_are_rejected() {
        let err = Error::Transport(lapin::Error::InvalidConnectionState(
            lapin::ConnectionState::Closed,
        ));
        assert_eq!(err.disposition(), Disposition::Reject);
    }

    #[test]
    fn dispatch_errors_are_acked() {
        let err = Error::Rpc(RpcError::HandlerNotFound {
            entry_point: "a.b".into(),
            message_type: "request".into(),
        });
        assert_eq!(err.disposition(), Disposition::Ack);

        let err = Error::Handler(HandlerError::new("ValueError", "boom"));
        assert_eq!(err.disposition(), Disposition::Ack);
    }

    #[test]
    fn handler_error_defaults_to_unknown_code() {
        let err = HandlerError::new("ValueError", "boom");
        assert_eq!(err.code, UNKNOWN_ERROR);

        let payload = ErrorPayload::from(&err);
        assert_eq!(payload.class, "ValueError");
        assert_eq!(payload.code, UNKNOWN_ERROR);
    }

    #[test]
    fn handler_error_from_rpc_error_keeps_the_code() {
        let err = HandlerError::from(RpcError::UnableToDiscover {
            service: "svc".into(),
        });
        assert_eq!(err.code, 1007);
        assert_eq!(err.class, "UnableToDiscover");
    }
}
