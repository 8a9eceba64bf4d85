//! Synchronous facades for non-async callers. Each facade owns a
//! current-thread tokio runtime and drives the event-loop adapter to
//! completion; broker I/O only progresses while a facade method runs.

use {
    crate::{client::RpcClient, error::Error, server::ServerHandle},
    std::time::Duration,
    tracing::warn,
};

fn runtime() -> Result<tokio::runtime::Runtime, Error> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

/// Blocking wrapper around [`crate::server::Server`]: one thread consumes,
/// dispatches serially and acknowledges before fetching the next delivery.
pub struct Server {
    runtime: tokio::runtime::Runtime,
    inner: crate::server::Server,
}

impl Server {
    pub fn new(inner: crate::server::Server) -> Result<Self, Error> {
        Ok(Self {
            runtime: runtime()?,
            inner,
        })
    }

    /// The registration surface of the wrapped server.
    pub fn inner_mut(&mut self) -> &mut crate::server::Server {
        &mut self.inner
    }

    pub fn handle(&self) -> ServerHandle {
        self.inner.handle()
    }

    /// Blocks the calling thread until the server stops.
    pub fn run(self) -> Result<(), Error> {
        self.runtime.block_on(self.inner.run())
    }
}

/// Blocking wrapper around [`RpcClient`].
pub struct Client {
    runtime: tokio::runtime::Runtime,
    inner: RpcClient,
}

impl Client {
    pub fn new(inner: RpcClient) -> Result<Self, Error> {
        Ok(Self {
            runtime: runtime()?,
            inner,
        })
    }

    pub fn inner(&self) -> &RpcClient {
        &self.inner
    }

    /// Publishes everything queued by this client's proxies, blocking until
    /// the broker handed the frames off.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.runtime.block_on(self.inner.flush())
    }

    /// Drives pending broker I/O (including protocol heartbeats) without
    /// publishing anything. Call between long stretches of caller-side work.
    pub fn process_events(&self) {
        self.runtime
            .block_on(tokio::time::sleep(Duration::from_millis(0)));
    }

    /// Heartbeats are sent by the connection reactor while any facade method
    /// blocks; there is nothing to send explicitly.
    pub fn send_heartbeat(&self) {
        warn!("send_heartbeat is implicit on this adapter; use process_events instead");
        self.process_events();
    }
}
