//! Call-site API for originating requests, casts, transfers and
//! notifications from a calling context.

use {
    crate::{error::Error, postprocessor::PostProcessor},
    courier_rpc::{
        domain::{CorrelationId, ServiceName},
        entry_point::{Destination, EntryPoint, Source},
        envelope::{Context, IncomingRequest, Notification, OutgoingMessage, Payload, Request},
        error::RpcError,
    },
    serde_json::Value,
    std::collections::HashMap,
};

/// Headers the framework owns end to end; a caller-supplied override fails
/// with `ForbiddenHeaders` before anything is published.
const FORBIDDEN_CALL_HEADERS: &[&str] = &["correlation_id", "source", "destination", "reply_to"];

pub(crate) fn check_headers(headers: &HashMap<String, String>) -> Result<(), RpcError> {
    let mut forbidden: Vec<&str> = headers
        .keys()
        .map(String::as_str)
        .filter(|key| FORBIDDEN_CALL_HEADERS.contains(key))
        .collect();

    if forbidden.is_empty() {
        return Ok(());
    }

    forbidden.sort_unstable();
    Err(RpcError::ForbiddenHeaders {
        headers: forbidden.join(", "),
    })
}

/// A proxy bound to one calling context: the source address, the inbound
/// context and correlation id, and the inbound extra headers.
///
/// The proxy itself performs no I/O; everything it builds goes through the
/// post-processing pipeline.
#[derive(Debug)]
pub struct Proxy<'a> {
    postprocessor: &'a PostProcessor,
    source: Source,
    context: Context,
    correlation_id: CorrelationId,
    inbound_headers: HashMap<String, String>,
    bound_headers: HashMap<String, String>,
}

impl<'a> Proxy<'a> {
    pub fn new(
        postprocessor: &'a PostProcessor,
        source: Source,
        context: Context,
        correlation_id: CorrelationId,
        inbound_headers: HashMap<String, String>,
    ) -> Self {
        Self {
            postprocessor,
            source,
            context,
            correlation_id,
            inbound_headers,
            bound_headers: HashMap::new(),
        }
    }

    /// Binds headers that apply to every call made through this proxy.
    /// Reserved headers are rejected.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Result<Self, RpcError> {
        check_headers(&headers)?;
        self.bound_headers = headers;
        Ok(self)
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Entry to the chained call form. Fails fast when the target service is
    /// not discoverable.
    pub fn service(&self, name: &str) -> Result<ServiceProxy<'_>, RpcError> {
        let service = ServiceName::from(name);
        self.postprocessor.discovery().remote(&service)?;

        Ok(ServiceProxy {
            proxy: self,
            service,
        })
    }

    /// Publishes a notification from this proxy's source.
    pub fn publish(&self, payload: Payload) -> Result<(), Error> {
        self.publish_with(payload, Context::default(), HashMap::new())
    }

    /// Publishes a notification with additional context and headers.
    pub fn publish_with(
        &self,
        payload: Payload,
        context: Context,
        headers: HashMap<String, String>,
    ) -> Result<(), Error> {
        check_headers(&headers)?;

        let mut merged_context = self.context.clone();
        for (key, value) in context {
            merged_context.insert(key, value);
        }

        let notification = Notification::create(
            self.source.clone(),
            Some(self.correlation_id.clone()),
            merged_context,
            payload,
            self.merge_headers(headers),
        );

        self.postprocessor
            .process(OutgoingMessage::Notification(notification))
    }

    /// Header precedence: per-call over proxy-bound over inbound.
    fn merge_headers(&self, call_headers: HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = self.inbound_headers.clone();
        merged.extend(self.bound_headers.clone());
        merged.extend(call_headers);
        merged
    }
}

/// A proxy narrowed to one discovered target service.
#[derive(Debug)]
pub struct ServiceProxy<'a> {
    proxy: &'a Proxy<'a>,
    service: ServiceName,
}

impl<'a> ServiceProxy<'a> {
    /// Starts building a request for `method` on the target service.
    pub fn request(&self, method: &str) -> CallBuilder<'a> {
        CallBuilder {
            proxy: self.proxy,
            destination: Destination(EntryPoint::full(self.service.as_ref(), method)),
            payload: Payload::default(),
            context: Context::default(),
            headers: HashMap::new(),
            correlation_id: None,
        }
    }
}

/// Accumulates payload, context and headers for one outbound request, then
/// sends it as a call, a cast or a transfer.
pub struct CallBuilder<'a> {
    proxy: &'a Proxy<'a>,
    destination: Destination,
    payload: Payload,
    context: Context,
    headers: HashMap<String, String>,
    correlation_id: Option<CorrelationId>,
}

impl CallBuilder<'_> {
    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_owned(), value.into());
        self
    }

    pub fn args(mut self, payload: Payload) -> Self {
        self.payload.extend(payload);
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context.extend(context);
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Overrides the correlation id, starting a new causality chain.
    pub fn correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Sends the request expecting a reply: `reply_to` is the source
    /// service.
    pub fn call(self) -> Result<(), Error> {
        let reply_to = self
            .proxy
            .source
            .service()
            .map(|service| EntryPoint::service_only(service.as_ref()))
            .unwrap_or(EntryPoint::Null);

        self.send(reply_to, None)
    }

    /// Sends the request without expecting a reply.
    pub fn cast(self) -> Result<(), Error> {
        self.send(EntryPoint::Null, None)
    }

    /// Forwards `original`'s work to the target: the correlation id is
    /// preserved and the original's context merges beneath this call's.
    pub fn transfer(self, original: &IncomingRequest) -> Result<(), Error> {
        let reply_to = self
            .proxy
            .source
            .service()
            .map(|service| EntryPoint::service_only(service.as_ref()))
            .unwrap_or(EntryPoint::Null);

        self.send(reply_to, Some(original))
    }

    fn send(self, reply_to: EntryPoint, original: Option<&IncomingRequest>) -> Result<(), Error> {
        check_headers(&self.headers)?;

        let extra = self.proxy.merge_headers(self.headers);
        let mut context = self.proxy.context.clone();
        context.extend(self.context);

        let request = match original {
            Some(original) => Request::transfer(
                original,
                self.proxy.source.clone(),
                self.destination,
                reply_to,
                context,
                self.payload,
                extra,
            ),

            None => Request::create(
                self.proxy.source.clone(),
                self.destination,
                reply_to,
                Some(
                    self.correlation_id
                        .unwrap_or_else(|| self.proxy.correlation_id.clone()),
                ),
                context,
                self.payload,
                extra,
            ),
        };

        self.proxy.postprocessor.process(OutgoingMessage::Request(request))
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{discovery::LocalDiscovery, postprocessor::PublishCommand},
        courier_rpc::codec,
        serde_json::json,
        std::sync::Arc,
        tokio::sync::mpsc::{self, UnboundedReceiver},
    };

    fn proxy_fixture() -> (PostProcessor, UnboundedReceiver<PublishCommand>) {
        let mut discovery = LocalDiscovery::new();
        discovery.register_remote_service("b", "b_ex");
        discovery.register_local_publisher("a", "a_events");

        let (tx, rx) = mpsc::unbounded_channel();
        (PostProcessor::new(Arc::new(discovery), tx), rx)
    }

    fn bound_proxy(postprocessor: &PostProcessor) -> Proxy<'_> {
        Proxy::new(
            postprocessor,
            Source(EntryPoint::full("a", "m")),
            Context::default(),
            CorrelationId::from("c1"),
            HashMap::new(),
        )
    }

    #[test]
    fn call_sets_reply_to_to_the_source_service() {
        let (postprocessor, mut rx) = proxy_fixture();
        let proxy = bound_proxy(&postprocessor);

        proxy
            .service("b")
            .unwrap()
            .request("n")
            .arg("x", 1)
            .call()
            .unwrap();

        let command = rx.try_recv().unwrap();
        assert_eq!(command.exchange.as_ref(), "b_ex");
        assert_eq!(command.routing_key.as_ref(), "b.n");
        assert_eq!(
            command.frame.headers.get("reply_to").map(String::as_str),
            Some("a")
        );
        assert_eq!(
            command.frame.headers.get("correlation_id").map(String::as_str),
            Some("c1")
        );
    }

    #[test]
    fn cast_has_no_reply_address() {
        let (postprocessor, mut rx) = proxy_fixture();
        let proxy = bound_proxy(&postprocessor);

        proxy.service("b").unwrap().request("n").cast().unwrap();

        let command = rx.try_recv().unwrap();
        assert_eq!(
            command.frame.headers.get("reply_to").map(String::as_str),
            Some("")
        );
    }

    #[test]
    fn unknown_target_fails_before_building_a_call() {
        let (postprocessor, _rx) = proxy_fixture();
        let proxy = bound_proxy(&postprocessor);

        assert_eq!(
            proxy.service("ghost").unwrap_err(),
            RpcError::UnableToDiscover {
                service: "ghost".to_owned()
            }
        );
    }

    #[test]
    fn forbidden_headers_are_rejected_before_publish() {
        let (postprocessor, mut rx) = proxy_fixture();
        let proxy = bound_proxy(&postprocessor);

        let err = proxy
            .service("b")
            .unwrap()
            .request("n")
            .header("correlation_id", "hijack")
            .call()
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Rpc(RpcError::ForbiddenHeaders { headers }) if headers == "correlation_id"
        ));
        assert!(rx.try_recv().is_err());

        let err = bound_proxy(&postprocessor)
            .with_headers(HashMap::from([("source".to_owned(), "spoof".to_owned())]))
            .unwrap_err();
        assert!(matches!(err, RpcError::ForbiddenHeaders { .. }));
    }

    #[test]
    fn publish_uses_the_bound_source_and_correlation() {
        let (postprocessor, mut rx) = proxy_fixture();
        let proxy = bound_proxy(&postprocessor);

        proxy
            .publish(Payload::from_iter([("volume".to_owned(), json!(11))]))
            .unwrap();

        let command = rx.try_recv().unwrap();
        assert_eq!(command.exchange.as_ref(), "a_events");
        assert_eq!(command.routing_key.as_ref(), "a.m");
        assert_eq!(
            command.frame.headers.get("message_type").map(String::as_str),
            Some("notification")
        );
        assert_eq!(
            command.frame.headers.get("correlation_id").map(String::as_str),
            Some("c1")
        );
        assert_eq!(
            command.frame.headers.get("destination").map(String::as_str),
            Some("")
        );
    }

    #[test]
    fn header_precedence_per_call_over_bound_over_inbound() {
        let (postprocessor, mut rx) = proxy_fixture();
        let proxy = Proxy::new(
            &postprocessor,
            Source(EntryPoint::full("a", "m")),
            Context::default(),
            CorrelationId::from("c1"),
            HashMap::from([
                ("x-tenant".to_owned(), "inbound".to_owned()),
                ("x-trace".to_owned(), "inbound".to_owned()),
                ("x-origin".to_owned(), "inbound".to_owned()),
            ]),
        )
        .with_headers(HashMap::from([
            ("x-tenant".to_owned(), "bound".to_owned()),
            ("x-trace".to_owned(), "bound".to_owned()),
        ]))
        .unwrap();

        proxy
            .service("b")
            .unwrap()
            .request("n")
            .header("x-tenant", "call")
            .call()
            .unwrap();

        let headers = rx.try_recv().unwrap().frame.headers;
        assert_eq!(headers.get("x-tenant").map(String::as_str), Some("call"));
        assert_eq!(headers.get("x-trace").map(String::as_str), Some("bound"));
        assert_eq!(headers.get("x-origin").map(String::as_str), Some("inbound"));
    }

    #[test]
    fn transfer_preserves_correlation_and_context() {
        let (postprocessor, mut rx) = proxy_fixture();
        let proxy = Proxy::new(
            &postprocessor,
            Source(EntryPoint::full("b", "n")),
            Context::default(),
            CorrelationId::from("proxy-correlation"),
            HashMap::new(),
        );

        let mut frame = codec::RawFrame::default();
        for (key, value) in [
            ("message_id", "m0"),
            ("request_id", "r0"),
            ("correlation_id", "c1"),
            ("message_type", "request"),
            ("source", "a.m"),
            ("destination", "b.n"),
            ("reply_to", "a"),
        ] {
            frame.headers.insert(key.to_owned(), value.to_owned());
        }
        frame.body = br#"{"payload": {}, "context": {"trace": "t1"}}"#.to_vec();
        let original = match codec::decode(&frame).unwrap() {
            courier_rpc::envelope::IncomingMessage::Request(request) => request,
            other => panic!("expected request, got {other:?}"),
        };

        proxy
            .service("b")
            .unwrap()
            .request("n")
            .arg("z", 3)
            .transfer(&original)
            .unwrap();

        let command = rx.try_recv().unwrap();
        let headers = &command.frame.headers;
        assert_eq!(
            headers.get("correlation_id").map(String::as_str),
            Some("c1")
        );
        assert_ne!(headers.get("request_id").map(String::as_str), Some("r0"));
        assert_eq!(headers.get("source").map(String::as_str), Some("b.n"));

        let body: serde_json::Value = serde_json::from_slice(&command.frame.body).unwrap();
        assert_eq!(body.get("context").and_then(|c| c.get("trace")), Some(&json!("t1")));
        assert_eq!(body.get("payload").and_then(|p| p.get("z")), Some(&json!(3)));
    }
}
