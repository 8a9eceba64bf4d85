//! Per-controller routing table mapping `(message kind, method)` to a
//! handler identifier. Populated once at registration time, read-only while
//! consuming.

use {
    courier_rpc::{
        domain::{MethodName, ServiceName},
        entry_point::EntryPoint,
        envelope::MessageType,
        error::RpcError,
    },
    std::collections::{hash_map::Entry, BTreeSet, HashMap},
};

#[derive(Debug, Clone)]
struct Slot {
    entry_point: EntryPoint,
    handler: String,
}

/// Handler table of one service controller.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    requests: HashMap<MethodName, Slot>,
    responses: HashMap<MethodName, Slot>,
    errors: HashMap<MethodName, Slot>,
    notifications: HashMap<MethodName, Slot>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: MessageType) -> &HashMap<MethodName, Slot> {
        match kind {
            MessageType::Request => &self.requests,
            MessageType::Response => &self.responses,
            MessageType::Error => &self.errors,
            MessageType::Notification => &self.notifications,
        }
    }

    fn table_mut(&mut self, kind: MessageType) -> &mut HashMap<MethodName, Slot> {
        match kind {
            MessageType::Request => &mut self.requests,
            MessageType::Response => &mut self.responses,
            MessageType::Error => &mut self.errors,
            MessageType::Notification => &mut self.notifications,
        }
    }

    /// Registers `handler` for the given entry point and message kind.
    ///
    /// Within one kind both directions are unique: a `(kind, method)` slot
    /// holds at most one handler, and a handler id holds at most one slot.
    pub fn register(
        &mut self,
        entry_point: &EntryPoint,
        kind: MessageType,
        handler: &str,
    ) -> Result<(), RpcError> {
        let method = entry_point
            .method()
            .cloned()
            .ok_or(RpcError::WrongEntryPointFormat)?;

        let table = self.table_mut(kind);
        if table.values().any(|slot| slot.handler == handler) {
            return Err(RpcError::DuplicatedMethodRegistration {
                method_name: handler.to_owned(),
            });
        }

        match table.entry(method) {
            Entry::Occupied(_) => Err(RpcError::DuplicatedEntryPointRegistration {
                method: entry_point.to_string(),
            }),

            Entry::Vacant(entry) => {
                entry.insert(Slot {
                    entry_point: entry_point.clone(),
                    handler: handler.to_owned(),
                });
                Ok(())
            }
        }
    }

    /// Resolves the handler registered for `entry_point` under `kind`.
    pub fn handler_for(
        &self,
        entry_point: &EntryPoint,
        kind: MessageType,
    ) -> Result<&str, RpcError> {
        entry_point
            .method()
            .and_then(|method| self.table(kind).get(method))
            .map(|slot| slot.handler.as_str())
            .ok_or_else(|| RpcError::HandlerNotFound {
                entry_point: entry_point.to_string(),
                message_type: kind.to_string(),
            })
    }

    /// Entry points this controller subscribes to, used for queue binding.
    pub fn publishers(&self) -> impl Iterator<Item = &EntryPoint> {
        self.notifications.values().map(|slot| &slot.entry_point)
    }

    /// The remote publisher entry point a local subscription handler is bound
    /// to.
    pub fn publisher_for(&self, handler: &str) -> Result<&EntryPoint, RpcError> {
        self.notifications
            .values()
            .find(|slot| slot.handler == handler)
            .map(|slot| &slot.entry_point)
            .ok_or_else(|| RpcError::PublisherEndpointNotFound {
                method_name: handler.to_owned(),
            })
    }

    /// Distinct service names across the request kind, used for queue
    /// binding.
    pub fn request_services(&self) -> Vec<ServiceName> {
        let names: BTreeSet<&str> = self
            .requests
            .values()
            .filter_map(|slot| slot.entry_point.service())
            .map(AsRef::as_ref)
            .collect();

        names.into_iter().map(ServiceName::from).collect()
    }
}
