use {
    super::*,
    crate::codec::{self, RawFrame},
    serde_json::json,
};

fn payload(entries: &[(&str, serde_json::Value)]) -> Payload {
    entries
        .iter()
        .map(|(key, value)| ((*key).to_owned(), value.clone()))
        .collect()
}

fn incoming_call() -> IncomingRequest {
    let mut frame = RawFrame::default();
    frame
        .headers
        .insert(HEADER_MESSAGE_ID.to_owned(), "m1".to_owned());
    frame
        .headers
        .insert(HEADER_REQUEST_ID.to_owned(), "r1".to_owned());
    frame
        .headers
        .insert(HEADER_CORRELATION_ID.to_owned(), "c1".to_owned());
    frame
        .headers
        .insert(HEADER_MESSAGE_TYPE.to_owned(), "request".to_owned());
    frame
        .headers
        .insert(HEADER_SOURCE.to_owned(), "a.m".to_owned());
    frame
        .headers
        .insert(HEADER_DESTINATION.to_owned(), "b.n".to_owned());
    frame
        .headers
        .insert(HEADER_REPLY_TO.to_owned(), "a".to_owned());
    frame.headers.insert("x-tenant".to_owned(), "acme".to_owned());
    frame.body = br#"{"payload": {"x": 1}, "context": {"trace": "t1"}}"#.to_vec();

    match codec::decode(&frame).unwrap() {
        IncomingMessage::Request(request) => request,
        other => panic!("expected a request, got {other:?}"),
    }
}

#[test]
fn response_addressing_mirrors_the_request() {
    let request = incoming_call();
    let response = Response::for_request(&request, payload(&[("y", json!(2))]));

    assert_eq!(response.correlation_id(), request.correlation_id());
    assert_eq!(response.request_id(), request.request_id());
    assert_eq!(response.source().0, request.destination().0);
    assert_eq!(response.destination().0, *request.reply_to());
    assert!(response.reply_to().is_null());
    assert_eq!(response.headers().message_type, MessageType::Response);
}

#[test]
fn response_falls_back_to_source_when_reply_to_is_null() {
    let mut request = incoming_call();
    request.headers.reply_to = EntryPoint::Null;

    let error = ErrorMessage::for_request(&request, ErrorPayload::new("Boom", "boom", None));
    assert_eq!(error.destination().0, request.source().0);
}

#[test]
fn response_message_id_is_fresh() {
    let request = incoming_call();
    let response = Response::for_request(&request, Payload::default());

    assert_ne!(
        response.headers().message_id,
        request.headers().message_id
    );
}

#[test]
fn response_propagates_extra_headers() {
    let request = incoming_call();
    let response = request.make_response(Payload::default());

    assert_eq!(
        response.headers().extra.get("x-tenant").map(String::as_str),
        Some("acme")
    );
}

#[test]
fn error_payload_carries_class_message_code() {
    let request = incoming_call();
    let error = ErrorMessage::for_request(
        &request,
        ErrorPayload::new("ValueError", "bad input", Some(1002)),
    );

    assert_eq!(error.payload().get("class"), Some(&json!("ValueError")));
    assert_eq!(error.payload().get("message"), Some(&json!("bad input")));
    assert_eq!(error.payload().get("code"), Some(&json!(1002)));
    assert_eq!(error.headers().message_type, MessageType::Error);
}

#[test]
fn request_mints_fresh_ids() {
    let first = Request::create(
        Source(EntryPoint::full("a", "m")),
        Destination(EntryPoint::full("b", "n")),
        EntryPoint::service_only("a"),
        None,
        Context::default(),
        Payload::default(),
        HashMap::new(),
    );
    let second = Request::create(
        Source(EntryPoint::full("a", "m")),
        Destination(EntryPoint::full("b", "n")),
        EntryPoint::service_only("a"),
        None,
        Context::default(),
        Payload::default(),
        HashMap::new(),
    );

    assert_ne!(first.request_id(), second.request_id());
    assert_ne!(first.headers().message_id, second.headers().message_id);
    assert_ne!(first.correlation_id(), second.correlation_id());
}

#[test]
fn transfer_preserves_correlation_and_merges_context() {
    let request = incoming_call();
    let transferred = Request::transfer(
        &request,
        Source(EntryPoint::full("b", "n")),
        Destination(EntryPoint::full("c", "op")),
        EntryPoint::service_only("b"),
        payload(&[("hop", json!(2))]),
        payload(&[("z", json!(3))]),
        HashMap::new(),
    );

    assert_eq!(transferred.correlation_id(), request.correlation_id());
    assert_ne!(transferred.request_id(), request.request_id());
    assert_eq!(transferred.context().get("trace"), Some(&json!("t1")));
    assert_eq!(transferred.context().get("hop"), Some(&json!(2)));
    assert_eq!(transferred.payload().get("z"), Some(&json!(3)));
}

#[test]
fn notification_is_addressless() {
    let notification = Notification::create(
        Source(EntryPoint::full("pub_svc", "evt")),
        None,
        Context::default(),
        payload(&[("volume", json!(11))]),
        HashMap::new(),
    );

    assert!(notification.destination().is_null());
    assert!(notification.reply_to().is_null());
    assert_eq!(
        notification.headers().message_type,
        MessageType::Notification
    );
}

#[test]
fn payload_merges_into_context_with_payload_precedence() {
    let mut message = IncomingMessage::Request(incoming_call());
    message.merge_payload_into_context();

    assert_eq!(message.context().get("x"), Some(&json!(1)));
    assert_eq!(message.context().get("trace"), Some(&json!("t1")));
}

#[test]
fn dispatching_entry_point_by_kind() {
    let request = incoming_call();
    let response = Response::for_request(&request, Payload::default());

    let inbound_request = IncomingMessage::Request(request.clone());
    assert_eq!(
        inbound_request.dispatching_entry_point().to_string(),
        "b.n"
    );

    // Re-decode the outgoing response as its receiver would see it.
    let frame = codec::encode(&OutgoingMessage::Response(response)).unwrap();
    let inbound_response = codec::decode(&frame).unwrap();
    assert_eq!(
        inbound_response.dispatching_entry_point().to_string(),
        "b.n"
    );
}

#[test]
fn encode_decode_round_trip_preserves_headers_and_body() {
    let request = Request::create(
        Source(EntryPoint::full("a", "m")),
        Destination(EntryPoint::full("b", "n")),
        EntryPoint::service_only("a"),
        Some(CorrelationId::from("c1")),
        payload(&[("trace", json!("t1"))]),
        payload(&[("x", json!(1))]),
        HashMap::from([("x-tenant".to_owned(), "acme".to_owned())]),
    );

    let frame = codec::encode(&OutgoingMessage::Request(request.clone())).unwrap();
    let decoded = codec::decode(&frame).unwrap();

    assert_eq!(decoded.headers(), request.headers());
    assert_eq!(decoded.payload(), request.payload());
    assert_eq!(decoded.context(), request.context());
}

#[test]
fn wire_headers_contain_every_reserved_field() {
    let request = incoming_call();
    let map = request.headers().to_map();

    for field in RESERVED_HEADERS {
        assert!(map.contains_key(*field), "{field}");
    }
    assert_eq!(map.get("x-tenant").map(String::as_str), Some("acme"));
}

#[test]
fn reserved_wire_headers_win_over_extras() {
    let mut request = incoming_call();
    request
        .headers
        .extra
        .insert(HEADER_SOURCE.to_owned(), "spoofed".to_owned());

    let map = request.headers().to_map();
    assert_eq!(map.get(HEADER_SOURCE).map(String::as_str), Some("a.m"));
}
