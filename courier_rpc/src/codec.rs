//! Serialization boundary between raw broker frames and typed envelopes.
//!
//! All envelope fields travel in broker message headers as strings; the body
//! is a UTF-8 JSON object `{"payload": {...}, "context": {...}}`.

use {
    crate::{
        domain::{CorrelationId, MessageId, RequestId},
        entry_point::{Destination, EntryPoint, Source},
        envelope::{
            Context, Headers, IncomingError, IncomingMessage, IncomingNotification,
            IncomingRequest, IncomingResponse, MessageType, OutgoingMessage, Payload,
            HEADER_CORRELATION_ID, HEADER_DESTINATION, HEADER_MESSAGE_ID, HEADER_MESSAGE_TYPE,
            HEADER_REPLY_TO, HEADER_REQUEST_ID, HEADER_SOURCE, RESERVED_HEADERS,
        },
        error::RpcError,
    },
    serde::{Deserialize, Serialize},
    std::collections::HashMap,
};

/// A raw broker frame: string headers plus an opaque JSON body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Body {
    #[serde(default)]
    payload: Payload,

    #[serde(default)]
    context: Context,
}

/// Header keys that must be present on every frame. `message_id` is minted
/// locally when absent; `destination` and `reply_to` may be empty strings
/// depending on the message kind.
const REQUIRED_HEADERS: &[&str] = &[
    HEADER_REQUEST_ID,
    HEADER_CORRELATION_ID,
    HEADER_MESSAGE_TYPE,
    HEADER_SOURCE,
    HEADER_DESTINATION,
    HEADER_REPLY_TO,
];

fn header<'a>(headers: &'a HashMap<String, String>, field: &str) -> Result<&'a str, RpcError> {
    headers
        .get(field)
        .map(String::as_str)
        .ok_or_else(|| RpcError::FieldMustExist {
            field: field.to_owned(),
        })
}

fn parse_entry_point(field: &str, value: &str) -> Result<EntryPoint, RpcError> {
    value
        .parse()
        .map_err(|_| RpcError::UnsuitableFieldValue {
            field: field.to_owned(),
            value: value.to_owned(),
        })
}

/// Validates the required headers of a frame without building an envelope.
/// Shared by the inbound preprocessing and the outbound validation step.
pub fn validate_headers(headers: &HashMap<String, String>) -> Result<(), RpcError> {
    for field in REQUIRED_HEADERS {
        header(headers, field)?;
    }

    let message_type = header(headers, HEADER_MESSAGE_TYPE)?;
    message_type
        .parse::<MessageType>()
        .map_err(|_| RpcError::UnsuitableFieldValue {
            field: HEADER_MESSAGE_TYPE.to_owned(),
            value: message_type.to_owned(),
        })?;

    let source = header(headers, HEADER_SOURCE)?;
    if source.is_empty() {
        return Err(RpcError::FieldMustFullyDefined {
            field: HEADER_SOURCE.to_owned(),
        });
    }
    parse_entry_point(HEADER_SOURCE, source)?;

    for field in [HEADER_DESTINATION, HEADER_REPLY_TO] {
        let value = header(headers, field)?;
        if !value.is_empty() {
            parse_entry_point(field, value)?;
        }
    }

    Ok(())
}

/// Decodes a raw frame into a typed incoming envelope.
///
/// Validation failures are handler-visible (ackable): a malformed message
/// would fail the same way on redelivery.
pub fn decode(frame: &RawFrame) -> Result<IncomingMessage, RpcError> {
    validate_headers(&frame.headers)?;

    let headers = &frame.headers;
    let message_type_value = header(headers, HEADER_MESSAGE_TYPE)?;
    let message_type: MessageType =
        message_type_value
            .parse()
            .map_err(|_| RpcError::UnsuitableFieldValue {
                field: HEADER_MESSAGE_TYPE.to_owned(),
                value: message_type_value.to_owned(),
            })?;

    let source = Source(parse_entry_point(
        HEADER_SOURCE,
        header(headers, HEADER_SOURCE)?,
    )?);
    let destination = Destination(parse_entry_point(
        HEADER_DESTINATION,
        header(headers, HEADER_DESTINATION)?,
    )?);
    let reply_to = parse_entry_point(HEADER_REPLY_TO, header(headers, HEADER_REPLY_TO)?)?;

    let message_id = headers
        .get(HEADER_MESSAGE_ID)
        .filter(|value| !value.is_empty())
        .map(|value| MessageId::from(value.as_str()))
        .unwrap_or_else(MessageId::generate);
    let request_id = RequestId::from(header(headers, HEADER_REQUEST_ID)?);
    let correlation_id = CorrelationId::from(header(headers, HEADER_CORRELATION_ID)?);

    let extra: HashMap<String, String> = headers
        .iter()
        .filter(|(key, _)| !RESERVED_HEADERS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let body: Body = if frame.body.is_empty() {
        Body::default()
    } else {
        serde_json::from_slice(&frame.body).map_err(|err| RpcError::UnsuitableFieldValue {
            field: "body".to_owned(),
            value: err.to_string(),
        })?
    };

    let require_destination = |destination: &Destination| -> Result<(), RpcError> {
        if destination.is_null() {
            return Err(RpcError::FieldMustFullyDefined {
                field: HEADER_DESTINATION.to_owned(),
            });
        }
        Ok(())
    };

    let build_headers = |destination: Destination, reply_to: EntryPoint| Headers {
        message_id: message_id.clone(),
        request_id: request_id.clone(),
        correlation_id: correlation_id.clone(),
        message_type,
        source: source.clone(),
        destination,
        reply_to,
        extra: extra.clone(),
    };

    let message = match message_type {
        MessageType::Request => {
            require_destination(&destination)?;
            IncomingMessage::Request(IncomingRequest::new(
                build_headers(destination, reply_to),
                body.context,
                body.payload,
            ))
        }

        MessageType::Response => {
            require_destination(&destination)?;
            IncomingMessage::Response(IncomingResponse::new(
                build_headers(destination, EntryPoint::Null),
                body.context,
                body.payload,
            ))
        }

        MessageType::Error => {
            require_destination(&destination)?;
            IncomingMessage::Error(IncomingError::new(
                build_headers(destination, EntryPoint::Null),
                body.context,
                body.payload,
            ))
        }

        // Notifications are addressless: whatever arrived in `destination`
        // and `reply_to` is normalized away.
        MessageType::Notification => IncomingMessage::Notification(IncomingNotification::new(
            build_headers(Destination(EntryPoint::Null), EntryPoint::Null),
            body.context,
            body.payload,
        )),
    };

    Ok(message)
}

/// Encodes an outgoing envelope into its wire frame.
pub fn encode(message: &OutgoingMessage) -> Result<RawFrame, RpcError> {
    let body = Body {
        payload: message.payload().clone(),
        context: message.context().clone(),
    };

    let body = serde_json::to_vec(&body).map_err(|err| RpcError::IncorrectOutgoingMessage {
        detail: err.to_string(),
    })?;

    Ok(RawFrame {
        headers: message.headers().to_map(),
        body,
    })
}

#[cfg(test)]
mod test {
    use {super::*, serde_json::json};

    fn request_frame() -> RawFrame {
        let mut headers = HashMap::new();
        headers.insert(HEADER_MESSAGE_ID.to_owned(), "m1".to_owned());
        headers.insert(HEADER_REQUEST_ID.to_owned(), "r1".to_owned());
        headers.insert(HEADER_CORRELATION_ID.to_owned(), "c1".to_owned());
        headers.insert(HEADER_MESSAGE_TYPE.to_owned(), "request".to_owned());
        headers.insert(HEADER_SOURCE.to_owned(), "a.m".to_owned());
        headers.insert(HEADER_DESTINATION.to_owned(), "b.n".to_owned());
        headers.insert(HEADER_REPLY_TO.to_owned(), "a".to_owned());

        RawFrame {
            headers,
            body: br#"{"payload": {"x": 1}, "context": {"tenant": "acme"}}"#.to_vec(),
        }
    }

    #[test]
    fn decodes_request_call() {
        let message = decode(&request_frame()).unwrap();

        let IncomingMessage::Request(request) = message else {
            panic!("expected a request");
        };
        assert!(request.is_call());
        assert_eq!(request.correlation_id().as_ref(), "c1");
        assert_eq!(request.destination().to_string(), "b.n");
        assert_eq!(request.payload().get("x"), Some(&json!(1)));
        assert_eq!(request.context().get("tenant"), Some(&json!("acme")));
    }

    #[test]
    fn empty_reply_to_decodes_as_cast() {
        let mut frame = request_frame();
        frame
            .headers
            .insert(HEADER_REPLY_TO.to_owned(), String::new());

        let IncomingMessage::Request(request) = decode(&frame).unwrap() else {
            panic!("expected a request");
        };
        assert!(!request.is_call());
    }

    #[test]
    fn missing_header_is_rejected() {
        let mut frame = request_frame();
        frame.headers.remove(HEADER_CORRELATION_ID);

        assert_eq!(
            decode(&frame),
            Err(RpcError::FieldMustExist {
                field: HEADER_CORRELATION_ID.to_owned()
            })
        );
    }

    #[test]
    fn empty_source_is_rejected() {
        let mut frame = request_frame();
        frame.headers.insert(HEADER_SOURCE.to_owned(), String::new());

        assert_eq!(
            decode(&frame),
            Err(RpcError::FieldMustFullyDefined {
                field: HEADER_SOURCE.to_owned()
            })
        );
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut frame = request_frame();
        frame
            .headers
            .insert(HEADER_MESSAGE_TYPE.to_owned(), "telegram".to_owned());

        assert!(matches!(
            decode(&frame),
            Err(RpcError::UnsuitableFieldValue { field, .. }) if field == HEADER_MESSAGE_TYPE
        ));
    }

    #[test]
    fn malformed_body_is_rejected() {
        let mut frame = request_frame();
        frame.body = b"not json".to_vec();

        assert!(matches!(
            decode(&frame),
            Err(RpcError::UnsuitableFieldValue { field, .. }) if field == "body"
        ));
    }

    #[test]
    fn empty_body_defaults_to_empty_mappings() {
        let mut frame = request_frame();
        frame.body = Vec::new();

        let message = decode(&frame).unwrap();
        assert!(message.payload().is_empty());
        assert!(message.context().is_empty());
    }

    #[test]
    fn missing_message_id_is_minted() {
        let mut frame = request_frame();
        frame.headers.remove(HEADER_MESSAGE_ID);

        let message = decode(&frame).unwrap();
        assert!(!message.headers().message_id.as_ref().is_empty());
    }

    #[test]
    fn request_without_destination_is_rejected() {
        let mut frame = request_frame();
        frame
            .headers
            .insert(HEADER_DESTINATION.to_owned(), String::new());

        assert_eq!(
            decode(&frame),
            Err(RpcError::FieldMustFullyDefined {
                field: HEADER_DESTINATION.to_owned()
            })
        );
    }

    #[test]
    fn notification_destination_is_normalized_away() {
        let mut frame = request_frame();
        frame
            .headers
            .insert(HEADER_MESSAGE_TYPE.to_owned(), "notification".to_owned());
        frame
            .headers
            .insert(HEADER_DESTINATION.to_owned(), String::new());
        frame
            .headers
            .insert(HEADER_REPLY_TO.to_owned(), String::new());

        let IncomingMessage::Notification(notification) = decode(&frame).unwrap() else {
            panic!("expected a notification");
        };
        assert!(notification.destination().is_null());
        assert!(notification.reply_to().is_null());
    }

    #[test]
    fn extra_headers_are_preserved() {
        let mut frame = request_frame();
        frame
            .headers
            .insert("x-trace".to_owned(), "abc".to_owned());

        let message = decode(&frame).unwrap();
        assert_eq!(
            message.headers().extra.get("x-trace").map(String::as_str),
            Some("abc")
        );
    }
}
