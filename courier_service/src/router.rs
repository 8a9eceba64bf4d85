//! Process-wide routing of incoming envelopes to hosted controllers. Two
//! tables, one for RPC dispatch and one for subscriptions, both frozen before
//! consumption starts.

use {
    crate::{error::Error, service::Controller},
    courier_rpc::{domain::ServiceName, envelope::IncomingMessage, error::RpcError},
    std::fmt,
    tracing::warn,
};

/// Stable identifier of a hosted controller type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId(pub &'static str);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Service-name → controller bindings for the rpc and subscription scopes.
#[derive(Debug, Clone, Default)]
pub struct Router {
    services: Vec<(ServiceName, ControllerId)>,
    subscriptions: Vec<(ServiceName, ControllerId)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `service` to `controller` for RPC dispatch. Duplicate pairs
    /// collapse; the same name may be bound to several controllers (resolved
    /// or rejected per message at dispatch time).
    pub fn register(&mut self, service: ServiceName, controller: ControllerId) {
        if !self.services.contains(&(service.clone(), controller)) {
            self.services.push((service, controller));
        }
    }

    /// Binds `service` to `controller` for notification dispatch.
    pub fn register_subscription(&mut self, service: ServiceName, controller: ControllerId) {
        if !self.subscriptions.contains(&(service.clone(), controller)) {
            self.subscriptions.push((service, controller));
        }
    }

    /// Resolves the single controller an rpc-kind envelope dispatches to.
    ///
    /// Requests match on the destination service. Responses and errors match
    /// on the source service, and only controllers that are themselves
    /// registered under the destination service suit: the reply must reach
    /// the controller that originated the call.
    pub fn controller_for_rpc(&self, message: &IncomingMessage) -> Result<ControllerId, RpcError> {
        let mut candidates: Vec<ControllerId> = match message {
            IncomingMessage::Request(request) => {
                let destination = request.destination().service();
                self.services
                    .iter()
                    .filter(|(name, _)| Some(name) == destination)
                    .map(|(_, controller)| *controller)
                    .collect()
            }

            IncomingMessage::Response(_) | IncomingMessage::Error(_) => {
                let source = message.headers().source.service();
                let destination = message.headers().destination.service();
                self.services
                    .iter()
                    .filter(|(name, controller)| {
                        Some(name) == source && self.is_registered_under(*controller, destination)
                    })
                    .map(|(_, controller)| *controller)
                    .collect()
            }

            IncomingMessage::Notification(_) => Vec::new(),
        };

        candidates.dedup();
        match candidates.as_slice() {
            [] => Err(RpcError::ServiceNotFound {
                entry_point: message.dispatching_entry_point().to_string(),
            }),

            [controller] => Ok(*controller),

            _ => Err(RpcError::DuplicatedServiceRegistration {
                service: message.dispatching_entry_point().to_string(),
            }),
        }
    }

    fn is_registered_under(&self, controller: ControllerId, service: Option<&ServiceName>) -> bool {
        self.services
            .iter()
            .any(|(name, bound)| *bound == controller && Some(name) == service)
    }

    /// Every subscription controller bound to the notification's source
    /// service, in registration order.
    pub fn subscription_controllers_for(&self, message: &IncomingMessage) -> Vec<ControllerId> {
        let source = message.headers().source.service();
        let mut controllers: Vec<ControllerId> = self
            .subscriptions
            .iter()
            .filter(|(name, _)| Some(name) == source)
            .map(|(_, controller)| *controller)
            .collect();

        controllers.dedup();
        controllers
    }

    /// Every service name `controller` is registered under in the rpc table.
    pub fn reverse_lookup(&self, controller: ControllerId) -> Result<Vec<&ServiceName>, RpcError> {
        let names: Vec<&ServiceName> = self
            .services
            .iter()
            .filter(|(_, bound)| *bound == controller)
            .map(|(name, _)| name)
            .collect();

        if names.is_empty() {
            return Err(RpcError::ServiceIsNotRegister {
                service: controller.to_string(),
            });
        }

        Ok(names)
    }

    /// Dispatches one envelope across the hosted controllers. Notifications
    /// fan out to every matching subscription controller; rpc kinds go to
    /// exactly one.
    pub fn process(
        &self,
        message: IncomingMessage,
        hosts: &mut [Box<dyn Controller>],
    ) -> Result<(), Error> {
        if let IncomingMessage::Notification(_) = &message {
            let controllers = self.subscription_controllers_for(&message);
            if controllers.is_empty() {
                warn!(
                    source = %message.headers().source,
                    "notification has no local subscribers"
                );
                return Ok(());
            }

            for controller in controllers {
                host_mut(hosts, controller)?.process(message.clone())?;
            }

            return Ok(());
        }

        let controller = self.controller_for_rpc(&message)?;
        host_mut(hosts, controller)?.process(message)
    }
}

fn host_mut(
    hosts: &mut [Box<dyn Controller>],
    controller: ControllerId,
) -> Result<&mut Box<dyn Controller>, RpcError> {
    hosts
        .iter_mut()
        .find(|host| host.id() == controller)
        .ok_or(RpcError::UnknownService {
            service: controller.to_string(),
        })
}
