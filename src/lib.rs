//! Courier: an RPC-and-Pub/Sub messaging SDK over AMQP 0-9-1 topic
//! exchanges. See `courier_rpc` for the envelope/wire model and
//! `courier_service` for the service runtime.

#[cfg(feature = "rpc")]
pub use courier_rpc as rpc;

#[cfg(feature = "service")]
pub use courier_service as service;
