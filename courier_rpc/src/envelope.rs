//! Typed message records exchanged between services: requests, responses,
//! errors and notifications, in incoming and outgoing flavors.
//!
//! Envelopes are created per broker delivery (or per outbound operation) and
//! discarded after dispatch. They are immutable after construction except for
//! the context, which is merge-only.

use {
    crate::{
        domain::{CorrelationId, MessageId, RequestId},
        entry_point::{Destination, EntryPoint, Source},
        error::ErrorPayload,
    },
    serde_json::Value,
    std::collections::HashMap,
};

#[cfg(test)]
mod tests;

/// The body `payload` mapping: string keys, arbitrary JSON values.
pub type Payload = serde_json::Map<String, Value>;

/// The body `context` mapping, propagated along a causality chain.
pub type Context = serde_json::Map<String, Value>;

pub const HEADER_MESSAGE_ID: &str = "message_id";
pub const HEADER_REQUEST_ID: &str = "request_id";
pub const HEADER_CORRELATION_ID: &str = "correlation_id";
pub const HEADER_MESSAGE_TYPE: &str = "message_type";
pub const HEADER_SOURCE: &str = "source";
pub const HEADER_DESTINATION: &str = "destination";
pub const HEADER_REPLY_TO: &str = "reply_to";

/// Header names owned by the framework. Everything else travels verbatim in
/// [`Headers::extra`].
pub const RESERVED_HEADERS: &[&str] = &[
    HEADER_MESSAGE_ID,
    HEADER_REQUEST_ID,
    HEADER_CORRELATION_ID,
    HEADER_MESSAGE_TYPE,
    HEADER_SOURCE,
    HEADER_DESTINATION,
    HEADER_REPLY_TO,
];

/// Kind discriminator carried in the `message_type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Error,
}

/// The envelope header block carried in broker message headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers {
    pub message_id: MessageId,
    pub request_id: RequestId,
    pub correlation_id: CorrelationId,
    pub message_type: MessageType,
    pub source: Source,
    pub destination: Destination,
    pub reply_to: EntryPoint,

    /// Extra user headers, preserved verbatim and propagated across a
    /// request/response pair.
    pub extra: HashMap<String, String>,
}

impl Headers {
    /// The wire form of the header block. Reserved names win over extras.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = self.extra.clone();
        map.insert(HEADER_MESSAGE_ID.to_owned(), self.message_id.to_string());
        map.insert(HEADER_REQUEST_ID.to_owned(), self.request_id.to_string());
        map.insert(
            HEADER_CORRELATION_ID.to_owned(),
            self.correlation_id.to_string(),
        );
        map.insert(
            HEADER_MESSAGE_TYPE.to_owned(),
            self.message_type.to_string(),
        );
        map.insert(HEADER_SOURCE.to_owned(), self.source.to_string());
        map.insert(HEADER_DESTINATION.to_owned(), self.destination.to_string());
        map.insert(HEADER_REPLY_TO.to_owned(), self.reply_to.to_string());
        map
    }
}

macro_rules! impl_message_body {
    ($Message:ident) => {
        impl $Message {
            pub fn new(headers: Headers, context: Context, payload: Payload) -> Self {
                Self {
                    headers,
                    context,
                    payload,
                }
            }

            pub fn headers(&self) -> &Headers {
                &self.headers
            }

            pub fn context(&self) -> &Context {
                &self.context
            }

            pub fn payload(&self) -> &Payload {
                &self.payload
            }

            pub fn request_id(&self) -> &RequestId {
                &self.headers.request_id
            }

            pub fn correlation_id(&self) -> &CorrelationId {
                &self.headers.correlation_id
            }

            pub fn source(&self) -> &Source {
                &self.headers.source
            }

            pub fn destination(&self) -> &Destination {
                &self.headers.destination
            }

            pub fn reply_to(&self) -> &EntryPoint {
                &self.headers.reply_to
            }

            /// Merge-only context update; `extra` keys overwrite existing ones.
            pub fn merge_context(&mut self, extra: &Context) {
                for (key, value) in extra {
                    self.context.insert(key.clone(), value.clone());
                }
            }

            /// Makes the payload fields visible as context, so downstream
            /// handlers and transfer/call operations propagate state.
            pub fn merge_payload_into_context(&mut self) {
                let payload = self.payload.clone();
                for (key, value) in payload {
                    self.context.insert(key, value);
                }
            }
        }
    };
}

/// An inbound request. A non-null `reply_to` makes it a call (a reply is
/// expected); a null one makes it a cast.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    headers: Headers,
    context: Context,
    payload: Payload,
}

impl_message_body!(IncomingRequest);

impl IncomingRequest {
    pub fn is_call(&self) -> bool {
        !self.headers.reply_to.is_null()
    }

    /// Create a response to this request.
    pub fn make_response(&self, payload: Payload) -> Response {
        Response::for_request(self, payload)
    }
}

/// An inbound response to a call this process originated.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingResponse {
    headers: Headers,
    context: Context,
    payload: Payload,
}

impl_message_body!(IncomingResponse);

/// An inbound error raised by a remote handler.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingError {
    headers: Headers,
    context: Context,
    payload: Payload,
}

impl_message_body!(IncomingError);

impl IncomingError {
    /// The `{class, message, code}` body, when it parses as one.
    pub fn error(&self) -> Option<ErrorPayload> {
        serde_json::from_value(Value::Object(self.payload.clone())).ok()
    }
}

/// An inbound notification published by a remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingNotification {
    headers: Headers,
    context: Context,
    payload: Payload,
}

impl_message_body!(IncomingNotification);

/// Any inbound envelope, as produced by the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Request(IncomingRequest),
    Response(IncomingResponse),
    Error(IncomingError),
    Notification(IncomingNotification),
}

impl IncomingMessage {
    pub fn headers(&self) -> &Headers {
        match self {
            Self::Request(msg) => msg.headers(),
            Self::Response(msg) => msg.headers(),
            Self::Error(msg) => msg.headers(),
            Self::Notification(msg) => msg.headers(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.headers().message_type
    }

    pub fn context(&self) -> &Context {
        match self {
            Self::Request(msg) => msg.context(),
            Self::Response(msg) => msg.context(),
            Self::Error(msg) => msg.context(),
            Self::Notification(msg) => msg.context(),
        }
    }

    pub fn payload(&self) -> &Payload {
        match self {
            Self::Request(msg) => msg.payload(),
            Self::Response(msg) => msg.payload(),
            Self::Error(msg) => msg.payload(),
            Self::Notification(msg) => msg.payload(),
        }
    }

    /// The address this envelope is dispatched by: the destination for
    /// requests, the source for responses, errors and notifications.
    pub fn dispatching_entry_point(&self) -> &EntryPoint {
        match self {
            Self::Request(msg) => &msg.headers().destination.0,
            Self::Response(msg) => &msg.headers().source.0,
            Self::Error(msg) => &msg.headers().source.0,
            Self::Notification(msg) => &msg.headers().source.0,
        }
    }

    pub fn merge_payload_into_context(&mut self) {
        match self {
            Self::Request(msg) => msg.merge_payload_into_context(),
            Self::Response(msg) => msg.merge_payload_into_context(),
            Self::Error(msg) => msg.merge_payload_into_context(),
            Self::Notification(msg) => msg.merge_payload_into_context(),
        }
    }
}

/// An outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    headers: Headers,
    context: Context,
    payload: Payload,
}

impl_message_body!(Request);

impl Request {
    /// New outbound request. Mints a fresh `request_id` and `message_id`; the
    /// correlation id is inherited when given and fresh otherwise.
    pub fn create(
        source: Source,
        destination: Destination,
        reply_to: EntryPoint,
        correlation_id: Option<CorrelationId>,
        context: Context,
        payload: Payload,
        extra: HashMap<String, String>,
    ) -> Self {
        Self {
            headers: Headers {
                message_id: MessageId::generate(),
                request_id: RequestId::generate(),
                correlation_id: correlation_id.unwrap_or_else(CorrelationId::generate),
                message_type: MessageType::Request,
                source,
                destination,
                reply_to,
                extra,
            },
            context,
            payload,
        }
    }

    /// Forwards the work of `original` to a new destination without losing
    /// causal context: the correlation id is preserved, the request id is
    /// fresh, and the original's context is merged beneath `context`.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        original: &IncomingRequest,
        source: Source,
        destination: Destination,
        reply_to: EntryPoint,
        context: Context,
        payload: Payload,
        extra: HashMap<String, String>,
    ) -> Self {
        let mut merged = original.context().clone();
        for (key, value) in &context {
            merged.insert(key.clone(), value.clone());
        }

        Self::create(
            source,
            destination,
            reply_to,
            Some(original.correlation_id().clone()),
            merged,
            payload,
            extra,
        )
    }
}

fn reply_headers(request: &IncomingRequest, message_type: MessageType) -> Headers {
    let reply_to = request.reply_to();
    let destination = if reply_to.is_null() {
        // Defensive path: a cast carries no reply address, so the error (or
        // response) goes back to the caller's source.
        Destination(request.source().0.clone())
    } else {
        Destination(reply_to.clone())
    };

    Headers {
        message_id: MessageId::generate(),
        request_id: request.request_id().clone(),
        correlation_id: request.correlation_id().clone(),
        message_type,
        source: Source(request.destination().0.clone()),
        destination,
        reply_to: EntryPoint::Null,
        extra: request.headers().extra.clone(),
    }
}

/// An outbound response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    headers: Headers,
    context: Context,
    payload: Payload,
}

impl_message_body!(Response);

impl Response {
    /// Create a response addressed back to the caller of `request`. The
    /// request id and correlation id are preserved; the source is the
    /// request's destination and the destination is its `reply_to`.
    pub fn for_request(request: &IncomingRequest, payload: Payload) -> Self {
        Self {
            headers: reply_headers(request, MessageType::Response),
            context: request.context().clone(),
            payload,
        }
    }
}

/// An outbound error, addressed exactly like a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    headers: Headers,
    context: Context,
    payload: Payload,
}

impl_message_body!(ErrorMessage);

impl ErrorMessage {
    /// Create an error reply for `request` carrying `{class, message, code}`.
    pub fn for_request(request: &IncomingRequest, error: ErrorPayload) -> Self {
        // Serializing a plain struct of strings and an integer cannot fail.
        let payload = match serde_json::to_value(&error) {
            Ok(Value::Object(map)) => map,
            _ => Payload::default(),
        };

        Self {
            headers: reply_headers(request, MessageType::Error),
            context: request.context().clone(),
            payload,
        }
    }
}

/// An outbound notification. Addressless: the destination and `reply_to`
/// stay null and subscribers are selected by the source routing key.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    headers: Headers,
    context: Context,
    payload: Payload,
}

impl_message_body!(Notification);

impl Notification {
    pub fn create(
        source: Source,
        correlation_id: Option<CorrelationId>,
        context: Context,
        payload: Payload,
        extra: HashMap<String, String>,
    ) -> Self {
        Self {
            headers: Headers {
                message_id: MessageId::generate(),
                request_id: RequestId::generate(),
                correlation_id: correlation_id.unwrap_or_else(CorrelationId::generate),
                message_type: MessageType::Notification,
                source,
                destination: Destination(EntryPoint::Null),
                reply_to: EntryPoint::Null,
                extra,
            },
            context,
            payload,
        }
    }
}

/// Any outbound envelope, as consumed by the post-processing pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    Request(Request),
    Response(Response),
    Error(ErrorMessage),
    Notification(Notification),
}

impl OutgoingMessage {
    pub fn headers(&self) -> &Headers {
        match self {
            Self::Request(msg) => msg.headers(),
            Self::Response(msg) => msg.headers(),
            Self::Error(msg) => msg.headers(),
            Self::Notification(msg) => msg.headers(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.headers().message_type
    }

    pub fn context(&self) -> &Context {
        match self {
            Self::Request(msg) => msg.context(),
            Self::Response(msg) => msg.context(),
            Self::Error(msg) => msg.context(),
            Self::Notification(msg) => msg.context(),
        }
    }

    pub fn payload(&self) -> &Payload {
        match self {
            Self::Request(msg) => msg.payload(),
            Self::Response(msg) => msg.payload(),
            Self::Error(msg) => msg.payload(),
            Self::Notification(msg) => msg.payload(),
        }
    }
}
