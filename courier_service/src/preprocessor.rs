//! Inbound pipeline: validate and decode raw frames, then hand them to the
//! router for dispatch across the hosted controllers.

use {
    crate::{error::Error, router::Router, service::Controller},
    courier_rpc::codec::{self, RawFrame},
};

/// Drives the inbound path for one server: owns the router and the hosted
/// controllers for the lifetime of the consume loop.
pub struct PreProcessor {
    router: Router,
    hosts: Vec<Box<dyn Controller>>,
}

impl PreProcessor {
    pub fn new(router: Router, hosts: Vec<Box<dyn Controller>>) -> Self {
        Self { router, hosts }
    }

    /// Processes one raw delivery. The result feeds the adapter's
    /// acknowledgement policy.
    pub fn process(&mut self, frame: &RawFrame) -> Result<(), Error> {
        let message = codec::decode(frame)?;
        self.router.process(message, &mut self.hosts)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            discovery::LocalDiscovery,
            postprocessor::PostProcessor,
            service::{ArgSpec, HandlerRegistry, HandlerResult, ServiceController, ServiceHost},
        },
        courier_rpc::error::RpcError,
        std::sync::{Arc, Mutex},
        tokio::sync::mpsc,
    };

    type Log = Arc<Mutex<Vec<String>>>;

    struct XController {
        log: Log,
    }

    impl ServiceController for XController {
        const NAME: &'static str = "x";

        fn register(registry: &mut HandlerRegistry<Self>) -> Result<(), RpcError> {
            registry.on_subscription(
                "pub_svc",
                "evt",
                "on_evt",
                ArgSpec::none(),
                |service, _notification, _proxy, _args| {
                    service.log.lock().unwrap().push("x".to_owned());
                    Ok(())
                },
            )?;

            // Also registered for RPC under the publisher's name: must stay
            // inert for notifications.
            registry.on_request(
                "pub_svc",
                "evt",
                "on_evt_request",
                ArgSpec::none(),
                |service, _request, _proxy, _args| {
                    service.log.lock().unwrap().push("x-rpc".to_owned());
                    Ok(HandlerResult::None)
                },
            )
        }
    }

    struct YController {
        log: Log,
    }

    impl ServiceController for YController {
        const NAME: &'static str = "y";

        fn register(registry: &mut HandlerRegistry<Self>) -> Result<(), RpcError> {
            registry.on_subscription(
                "pub_svc",
                "evt",
                "on_evt",
                ArgSpec::none(),
                |service, _notification, _proxy, _args| {
                    service.log.lock().unwrap().push("y".to_owned());
                    Ok(())
                },
            )
        }
    }

    fn preprocessor(log: &Log) -> PreProcessor {
        let discovery = Arc::new(LocalDiscovery::new());
        // The receiver is dropped: these controllers never publish.
        let (tx, _rx) = mpsc::unbounded_channel();

        let x = ServiceHost::new(
            XController { log: log.clone() },
            discovery.clone(),
            PostProcessor::new(discovery.clone(), tx.clone()),
        )
        .unwrap();
        let y = ServiceHost::new(
            YController { log: log.clone() },
            discovery.clone(),
            PostProcessor::new(discovery.clone(), tx),
        )
        .unwrap();

        let mut router = Router::new();
        for host in [&x as &dyn Controller, &y as &dyn Controller] {
            for name in host.rpc_bindings() {
                router.register(name.clone(), host.id());
            }
            for name in host.subscription_bindings() {
                router.register_subscription(name.clone(), host.id());
            }
        }

        let hosts: Vec<Box<dyn Controller>> = vec![Box::new(x), Box::new(y)];
        PreProcessor::new(router, hosts)
    }

    fn notification_frame(source: &str) -> RawFrame {
        let mut frame = RawFrame::default();
        for (key, value) in [
            ("message_id", "m1"),
            ("request_id", "r1"),
            ("correlation_id", "c1"),
            ("message_type", "notification"),
            ("source", source),
            ("destination", ""),
            ("reply_to", ""),
        ] {
            frame.headers.insert(key.to_owned(), value.to_owned());
        }
        frame
    }

    #[test]
    fn notification_fans_out_to_every_subscriber_exactly_once() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut preprocessor = preprocessor(&log);

        preprocessor
            .process(&notification_frame("pub_svc.evt"))
            .unwrap();

        let mut seen = log.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec!["x", "y"]);
    }

    #[test]
    fn notification_ignores_rpc_registration() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut preprocessor = preprocessor(&log);

        preprocessor
            .process(&notification_frame("pub_svc.evt"))
            .unwrap();

        assert!(!log.lock().unwrap().contains(&"x-rpc".to_owned()));
    }

    #[test]
    fn notification_without_subscribers_is_dropped_quietly() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut preprocessor = preprocessor(&log);

        preprocessor
            .process(&notification_frame("other_svc.evt"))
            .unwrap();

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_frame_is_a_validation_error() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut preprocessor = preprocessor(&log);

        let mut frame = notification_frame("pub_svc.evt");
        frame.headers.remove("correlation_id");

        let err = preprocessor.process(&frame).unwrap_err();
        assert!(matches!(
            err,
            Error::Rpc(RpcError::FieldMustExist { field }) if field == "correlation_id"
        ));
    }

    #[test]
    fn request_reaches_the_rpc_handler() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut preprocessor = preprocessor(&log);

        let mut frame = notification_frame("caller.m");
        frame
            .headers
            .insert("message_type".to_owned(), "request".to_owned());
        frame
            .headers
            .insert("destination".to_owned(), "pub_svc.evt".to_owned());

        preprocessor.process(&frame).unwrap();

        assert_eq!(log.lock().unwrap().clone(), vec!["x-rpc"]);
    }

    #[test]
    fn undeclared_notification_payload_key_is_rejected() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut preprocessor = preprocessor(&log);

        let mut frame = notification_frame("pub_svc.evt");
        frame.body = br#"{"payload": {"volume": 11}}"#.to_vec();

        let err = preprocessor.process(&frame).unwrap_err();
        // `volume` is not declared by the subscription handlers.
        assert!(matches!(
            err,
            Error::Rpc(RpcError::UnsuitableFieldValue { field, .. }) if field == "volume"
        ));
    }
}
