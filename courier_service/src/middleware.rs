//! Middleware hooks for the incoming and outgoing message paths.

use {
    crate::error::HandlerError,
    courier_rpc::envelope::{IncomingMessage, OutgoingMessage},
    std::collections::HashMap,
    tracing::debug,
};

/// Hooks invoked around message processing. Both default to pass-through.
pub trait Middleware: Send {
    /// Called for every incoming envelope before kind routing. Returning
    /// `Some(reply)` terminates the chain; the reply is published when the
    /// envelope was a call-request. Returning an error converts to an
    /// `error` envelope on the call path.
    fn on_incoming(
        &self,
        _message: &mut IncomingMessage,
    ) -> Result<Option<OutgoingMessage>, HandlerError> {
        Ok(None)
    }

    /// Called for every outgoing envelope before it enters the publish
    /// pipeline.
    fn on_outgoing(&self, _message: &mut OutgoingMessage) -> Result<(), HandlerError> {
        Ok(())
    }
}

const AUTHORIZATION: &str = "authorization";
const PROXY_AUTHORIZATION: &str = "proxy-authorization";

/// Replaces the values of sensitive headers before they reach a log record.
/// Lookup is case-insensitive; the original key case is kept on output.
fn redacted(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(key, value)| {
            let replacement = match key.to_lowercase().as_str() {
                AUTHORIZATION => Some("<authorization>"),
                PROXY_AUTHORIZATION => Some("<proxy-authorization>"),
                _ => None,
            };

            match replacement {
                Some(replacement) => (key.clone(), replacement.to_owned()),
                None => (key.clone(), value.clone()),
            }
        })
        .collect()
}

/// Logs envelopes on both paths with sensitive headers redacted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMiddleware;

impl LogMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for LogMiddleware {
    fn on_incoming(
        &self,
        message: &mut IncomingMessage,
    ) -> Result<Option<OutgoingMessage>, HandlerError> {
        let headers = message.headers();
        debug!(
            message_type = %headers.message_type,
            source = %headers.source,
            destination = %headers.destination,
            headers = ?redacted(&headers.extra),
            "incoming message"
        );

        Ok(None)
    }

    fn on_outgoing(&self, message: &mut OutgoingMessage) -> Result<(), HandlerError> {
        let headers = message.headers();
        debug!(
            message_type = %headers.message_type,
            source = %headers.source,
            destination = %headers.destination,
            headers = ?redacted(&headers.extra),
            "outgoing message"
        );

        Ok(())
    }
}
