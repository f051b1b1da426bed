//! Scoped client handles.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use vgi_matrix::Combination;

use super::connector::{LogSubscription, ServiceConnector, SharedPipe};
use crate::errors::{HarnessError, HarnessResult};
use crate::worker::WorkerProcess;

/// Boxed future borrowed from a client, used by [`super::Factory::with_client`] bodies.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A per-test worker owned by exactly one handle.
#[derive(Debug)]
pub(crate) struct OwnedWorker {
    pub(crate) process: WorkerProcess,
    pub(crate) pipe: SharedPipe,
}

impl OwnedWorker {
    pub(crate) async fn stop(mut self, timeout: Duration) -> HarnessResult<()> {
        self.pipe.lock().await.close_input().await;
        self.process.stop(timeout).await
    }
}

/// Stops log delivery when the handle goes away, released or not.
#[derive(Debug)]
struct LogGuard(LogSubscription);

impl Drop for LogGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// A client bound to one test.
///
/// Release it with [`ScopedClient::release`]. A handle that is dropped instead (a panicking test
/// body, say) still stops log delivery and kills a per-test worker, but cannot report teardown
/// failures.
pub struct ScopedClient<C: ServiceConnector> {
    combination: Combination,
    client: C::Client,
    connector: Arc<C>,
    logs: LogGuard,
    owned: Option<OwnedWorker>,
    worker_pid: Option<u32>,
    stop_timeout: Duration,
}

impl<C: ServiceConnector> ScopedClient<C> {
    pub(crate) fn new(
        combination: Combination,
        client: C::Client,
        connector: Arc<C>,
        logs: LogSubscription,
        owned: Option<OwnedWorker>,
        worker_pid: Option<u32>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            combination,
            client,
            connector,
            logs: LogGuard(logs),
            owned,
            worker_pid,
            stop_timeout,
        }
    }

    pub fn combination(&self) -> Combination {
        self.combination
    }

    pub fn client(&mut self) -> &mut C::Client {
        &mut self.client
    }

    /// Pid of the worker serving this handle.
    pub fn worker_pid(&self) -> Option<u32> {
        self.worker_pid
    }

    /// Whether this handle owns (and will stop) its worker.
    pub fn owns_worker(&self) -> bool {
        self.owned.is_some()
    }

    /// Close the client, stop log delivery and, for per-test workers, stop the worker.
    ///
    /// The worker is stopped even when disconnecting fails; a teardown failure wins over a
    /// disconnect failure.
    pub async fn release(self) -> HarnessResult<()> {
        let ScopedClient {
            combination,
            client,
            connector,
            logs,
            owned,
            stop_timeout,
            ..
        } = self;

        drop(logs);
        let disconnected = connector.disconnect(client).await;
        if let Some(owned) = owned {
            owned.stop(stop_timeout).await?;
        }
        debug!(%combination, "client released");
        disconnected.map_err(|source| HarnessError::Connect { combination, source })
    }
}

impl<C: ServiceConnector> Deref for ScopedClient<C> {
    type Target = C::Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl<C: ServiceConnector> DerefMut for ScopedClient<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.client
    }
}
