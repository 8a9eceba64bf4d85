//! Handler hosting: the [`ServiceController`] registration surface and the
//! [`ServiceHost`] that drives middlewares, kind routing, handler invocation
//! and result conversion for one controller.

use {
    crate::{
        dispatcher::Dispatcher,
        discovery::Discovery,
        error::{Error, HandlerError},
        middleware::Middleware,
        postprocessor::PostProcessor,
        proxy::Proxy,
        router::ControllerId,
    },
    courier_rpc::{
        domain::ServiceName,
        entry_point::{EntryPoint, Source},
        envelope::{
            ErrorMessage, IncomingError, IncomingMessage, IncomingNotification, IncomingRequest,
            IncomingResponse, MessageType, OutgoingMessage, Payload, Response,
        },
        error::{ErrorPayload, RpcError},
    },
    std::collections::HashMap,
    tracing::{error, warn},
};


/// What a request handler produced.
#[derive(Debug)]
pub enum HandlerResult {
    /// A payload mapping, turned into a response to the request.
    Reply(Payload),

    /// A fully built response envelope.
    Response(Response),

    /// A fully built error envelope.
    Error(ErrorMessage),

    /// Nothing to send; the caller receives no reply.
    None,
}

/// Declared keyword arguments of a request or subscription handler.
///
/// The payload is filtered against the declaration before invocation:
/// unknown keys are rejected and missing required keys are an error.
#[derive(Debug, Clone, Default)]
pub struct ArgSpec {
    required: Vec<String>,
    optional: Vec<String>,
}

impl ArgSpec {
    /// A handler taking no payload arguments.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn required<const N: usize>(keys: [&str; N]) -> Self {
        Self {
            required: keys.iter().map(|key| (*key).to_owned()).collect(),
            optional: Vec::new(),
        }
    }

    pub fn and_optional<const N: usize>(mut self, keys: [&str; N]) -> Self {
        self.optional
            .extend(keys.iter().map(|key| (*key).to_owned()));
        self
    }

    fn filter(&self, payload: &Payload) -> Result<Payload, RpcError> {
        for key in payload.keys() {
            if !self.required.iter().any(|k| k == key) && !self.optional.iter().any(|k| k == key) {
                return Err(RpcError::UnsuitableFieldValue {
                    field: key.clone(),
                    value: "unexpected argument".to_owned(),
                });
            }
        }

        for key in &self.required {
            if !payload.contains_key(key) {
                return Err(RpcError::FieldMustExist { field: key.clone() });
            }
        }

        Ok(payload.clone())
    }
}

type RequestHandler<S> = dyn Fn(&mut S, &IncomingRequest, &Proxy<'_>, Payload) -> Result<HandlerResult, HandlerError>
    + Send;
type ResponseHandler<S> =
    dyn Fn(&mut S, &IncomingResponse, &Proxy<'_>, Payload) -> Result<(), HandlerError> + Send;
type ErrHandler<S> = dyn Fn(&mut S, &IncomingError, &Proxy<'_>) -> Result<(), HandlerError> + Send;
type NotificationHandler<S> = dyn Fn(&mut S, &IncomingNotification, &Proxy<'_>, Payload) -> Result<(), HandlerError>
    + Send;

struct RequestSlot<S> {
    args: ArgSpec,
    handler: Box<RequestHandler<S>>,
}

struct NotificationSlot<S> {
    args: ArgSpec,
    handler: Box<NotificationHandler<S>>,
}

/// A service controller: a unit hosting handlers for one or more services.
///
/// Registration is an explicit phase: `register` runs once per host, before
/// consumption starts, and binds closures by stable handler identifiers.
pub trait ServiceController: Send + 'static {
    /// Stable name identifying this controller type in the router tables
    /// and serving as the host service name for subscriptions. Must be
    /// unique within the process.
    const NAME: &'static str;

    fn register(registry: &mut HandlerRegistry<Self>) -> Result<(), RpcError>
    where
        Self: Sized;
}

/// Registration surface handed to [`ServiceController::register`].
pub struct HandlerRegistry<S> {
    dispatcher: Dispatcher,
    requests: HashMap<String, RequestSlot<S>>,
    responses: HashMap<String, Box<ResponseHandler<S>>>,
    errors: HashMap<String, Box<ErrHandler<S>>>,
    notifications: HashMap<String, NotificationSlot<S>>,
    rpc_bindings: Vec<ServiceName>,
    subscription_bindings: Vec<ServiceName>,
}

impl<S: ServiceController> HandlerRegistry<S> {
    fn new() -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            requests: HashMap::new(),
            responses: HashMap::new(),
            errors: HashMap::new(),
            notifications: HashMap::new(),
            rpc_bindings: Vec::new(),
            subscription_bindings: Vec::new(),
        }
    }

    fn bind_rpc(&mut self, service: &str) {
        let service = ServiceName::from(service);
        if !self.rpc_bindings.contains(&service) {
            self.rpc_bindings.push(service);
        }
    }

    /// Registers a request handler for `service.method`.
    pub fn on_request<F>(
        &mut self,
        service: &str,
        method: &str,
        handler_id: &str,
        args: ArgSpec,
        handler: F,
    ) -> Result<(), RpcError>
    where
        F: Fn(&mut S, &IncomingRequest, &Proxy<'_>, Payload) -> Result<HandlerResult, HandlerError>
            + Send
            + 'static,
    {
        let entry_point = EntryPoint::full(service, method);
        self.dispatcher
            .register(&entry_point, MessageType::Request, handler_id)?;
        self.requests.insert(
            handler_id.to_owned(),
            RequestSlot {
                args,
                handler: Box::new(handler),
            },
        );
        self.bind_rpc(service);
        Ok(())
    }

    /// Registers a handler for responses to calls this controller made to
    /// the remote `service.method`.
    pub fn on_response<F>(
        &mut self,
        service: &str,
        method: &str,
        handler_id: &str,
        handler: F,
    ) -> Result<(), RpcError>
    where
        F: Fn(&mut S, &IncomingResponse, &Proxy<'_>, Payload) -> Result<(), HandlerError>
            + Send
            + 'static,
    {
        let entry_point = EntryPoint::full(service, method);
        self.dispatcher
            .register(&entry_point, MessageType::Response, handler_id)?;
        self.responses
            .insert(handler_id.to_owned(), Box::new(handler));
        self.bind_rpc(service);
        Ok(())
    }

    /// Registers a handler for errors raised by the remote `service.method`.
    pub fn on_error<F>(
        &mut self,
        service: &str,
        method: &str,
        handler_id: &str,
        handler: F,
    ) -> Result<(), RpcError>
    where
        F: Fn(&mut S, &IncomingError, &Proxy<'_>) -> Result<(), HandlerError> + Send + 'static,
    {
        let entry_point = EntryPoint::full(service, method);
        self.dispatcher
            .register(&entry_point, MessageType::Error, handler_id)?;
        self.errors.insert(handler_id.to_owned(), Box::new(handler));
        self.bind_rpc(service);
        Ok(())
    }

    /// Subscribes a handler to notifications published by the remote
    /// `service` under `event`.
    pub fn on_subscription<F>(
        &mut self,
        service: &str,
        event: &str,
        handler_id: &str,
        args: ArgSpec,
        handler: F,
    ) -> Result<(), RpcError>
    where
        F: Fn(&mut S, &IncomingNotification, &Proxy<'_>, Payload) -> Result<(), HandlerError>
            + Send
            + 'static,
    {
        let entry_point = EntryPoint::full(service, event);
        self.dispatcher
            .register(&entry_point, MessageType::Notification, handler_id)?;
        self.notifications.insert(
            handler_id.to_owned(),
            NotificationSlot {
                args,
                handler: Box::new(handler),
            },
        );

        let service = ServiceName::from(service);
        if !self.subscription_bindings.contains(&service) {
            self.subscription_bindings.push(service);
        }
        Ok(())
    }
}

/// Object-safe interface of a hosted controller, as the router sees it.
pub trait Controller: Send {
    fn id(&self) -> ControllerId;
    fn dispatcher(&self) -> &Dispatcher;
    fn discovery(&self) -> &std::sync::Arc<dyn Discovery>;
    fn rpc_bindings(&self) -> &[ServiceName];
    fn subscription_bindings(&self) -> &[ServiceName];
    fn process(&mut self, message: IncomingMessage) -> Result<(), Error>;
}

/// Hosts one controller instance together with its handler table,
/// middleware chains and outbound pipeline.
pub struct ServiceHost<S: ServiceController> {
    service: S,
    registry: HandlerRegistry<S>,
    incoming: Vec<Box<dyn Middleware>>,
    outgoing: Vec<Box<dyn Middleware>>,
    postprocessor: PostProcessor,
    discovery: std::sync::Arc<dyn Discovery>,
}

impl<S: ServiceController> ServiceHost<S> {
    pub fn new(
        service: S,
        discovery: std::sync::Arc<dyn Discovery>,
        postprocessor: PostProcessor,
    ) -> Result<Self, RpcError> {
        let mut registry = HandlerRegistry::new();
        S::register(&mut registry)?;

        Ok(Self {
            service,
            registry,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            postprocessor,
            discovery,
        })
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn add_incoming_middleware(&mut self, middleware: Box<dyn Middleware>) {
        self.incoming.push(middleware);
    }

    pub fn add_outgoing_middleware(&mut self, middleware: Box<dyn Middleware>) {
        self.outgoing.push(middleware);
    }

    fn send(&self, mut message: OutgoingMessage) -> Result<(), Error> {
        for middleware in &self.outgoing {
            middleware.on_outgoing(&mut message)?;
        }

        self.postprocessor.process(message)
    }

    fn process_request(&mut self, request: IncomingRequest) -> Result<(), Error> {
        let entry_point = request.destination().0.clone();
        let handler_id = self
            .registry
            .dispatcher
            .handler_for(&entry_point, MessageType::Request)?
            .to_owned();
        let slot = self
            .registry
            .requests
            .get(&handler_id)
            .ok_or_else(|| RpcError::HandlerNotFound {
                entry_point: entry_point.to_string(),
                message_type: MessageType::Request.to_string(),
            })?;

        let proxy = Proxy::new(
            &self.postprocessor,
            Source(request.destination().0.clone()),
            request.context().clone(),
            request.correlation_id().clone(),
            request.headers().extra.clone(),
        );

        let outcome = match slot.args.filter(request.payload()) {
            Ok(args) => (slot.handler)(&mut self.service, &request, &proxy, args),
            Err(err) => Err(HandlerError::from(err)),
        };

        let is_call = request.is_call();
        match outcome {
            Ok(result) => {
                if !is_call {
                    // Cast: nothing is sent back regardless of the result.
                    return Ok(());
                }

                match result {
                    HandlerResult::Reply(payload) => {
                        let response = request.make_response(payload);
                        self.send(OutgoingMessage::Response(response))
                    }
                    HandlerResult::Response(response) => {
                        self.send(OutgoingMessage::Response(response))
                    }
                    HandlerResult::Error(error) => self.send(OutgoingMessage::Error(error)),
                    HandlerResult::None => Ok(()),
                }
            }

            Err(err) => {
                if is_call {
                    error!(handler = %handler_id, error = %err, "request handler failed");
                    let error = ErrorMessage::for_request(&request, ErrorPayload::from(&err));
                    self.send(OutgoingMessage::Error(error))
                } else {
                    // Cast: surface the failure to the adapter's ack policy.
                    Err(Error::Handler(err))
                }
            }
        }
    }

    fn process_response(&mut self, response: IncomingResponse) -> Result<(), Error> {
        let entry_point = response.source().0.clone();
        let handler_id = self
            .registry
            .dispatcher
            .handler_for(&entry_point, MessageType::Response)?
            .to_owned();
        let handler = self
            .registry
            .responses
            .get(&handler_id)
            .ok_or_else(|| RpcError::HandlerNotFound {
                entry_point: entry_point.to_string(),
                message_type: MessageType::Response.to_string(),
            })?;

        let proxy = Proxy::new(
            &self.postprocessor,
            Source(response.destination().0.clone()),
            response.context().clone(),
            response.correlation_id().clone(),
            response.headers().extra.clone(),
        );

        let payload = response.payload().clone();
        handler(&mut self.service, &response, &proxy, payload).map_err(Error::Handler)
    }

    fn process_error(&mut self, error: IncomingError) -> Result<(), Error> {
        let entry_point = error.source().0.clone();
        let handler_id = self
            .registry
            .dispatcher
            .handler_for(&entry_point, MessageType::Error)?
            .to_owned();
        let handler = self
            .registry
            .errors
            .get(&handler_id)
            .ok_or_else(|| RpcError::HandlerNotFound {
                entry_point: entry_point.to_string(),
                message_type: MessageType::Error.to_string(),
            })?;

        let proxy = Proxy::new(
            &self.postprocessor,
            Source(error.destination().0.clone()),
            error.context().clone(),
            error.correlation_id().clone(),
            error.headers().extra.clone(),
        );

        handler(&mut self.service, &error, &proxy).map_err(Error::Handler)
    }

    fn process_notification(&mut self, notification: IncomingNotification) -> Result<(), Error> {
        let entry_point = notification.source().0.clone();
        let handler_id = self
            .registry
            .dispatcher
            .handler_for(&entry_point, MessageType::Notification)
            .map_err(|_| RpcError::SubscriptionHandlerNotFound {
                entry_point: entry_point.to_string(),
            })?
            .to_owned();
        let slot = self.registry.notifications.get(&handler_id).ok_or_else(|| {
            RpcError::SubscriptionHandlerNotFound {
                entry_point: entry_point.to_string(),
            }
        })?;

        // For subscriptions the outbound source is the host service's own
        // entry point, not the publisher's.
        let proxy = Proxy::new(
            &self.postprocessor,
            Source(EntryPoint::full(S::NAME, handler_id.as_str())),
            notification.context().clone(),
            notification.correlation_id().clone(),
            notification.headers().extra.clone(),
        );

        let args = slot.args.filter(notification.payload())?;
        (slot.handler)(&mut self.service, &notification, &proxy, args).map_err(Error::Handler)
    }
}

impl<S: ServiceController> Controller for ServiceHost<S> {
    fn id(&self) -> ControllerId {
        ControllerId(S::NAME)
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.registry.dispatcher
    }

    fn discovery(&self) -> &std::sync::Arc<dyn Discovery> {
        &self.discovery
    }

    fn rpc_bindings(&self) -> &[ServiceName] {
        &self.registry.rpc_bindings
    }

    fn subscription_bindings(&self) -> &[ServiceName] {
        &self.registry.subscription_bindings
    }

    fn process(&mut self, mut message: IncomingMessage) -> Result<(), Error> {
        // Payload fields become visible as context before anything else, so
        // downstream handlers and transfer/call operations propagate state.
        message.merge_payload_into_context();

        let is_call = matches!(
            &message,
            IncomingMessage::Request(request) if request.is_call()
        );

        for middleware in &self.incoming {
            match middleware.on_incoming(&mut message) {
                Ok(None) => {}

                Ok(Some(reply)) => {
                    if is_call {
                        return self.send(reply);
                    }
                    return Ok(());
                }

                Err(err) => {
                    if let IncomingMessage::Request(request) = &message {
                        if request.is_call() {
                            warn!(error = %err, "incoming middleware failed, replying with error");
                            let error =
                                ErrorMessage::for_request(request, ErrorPayload::from(&err));
                            return self.send(OutgoingMessage::Error(error));
                        }
                    }
                    return Err(Error::Handler(err));
                }
            }
        }

        match message {
            IncomingMessage::Request(request) => self.process_request(request),
            IncomingMessage::Response(response) => self.process_response(response),
            IncomingMessage::Error(error) => self.process_error(error),
            IncomingMessage::Notification(notification) => {
                self.process_notification(notification)
            }
        }
    }
}
