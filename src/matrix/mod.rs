//! The connection matrix.
//!
//! Scenario code sees one thing per combination: a [`Factory`] that hands out
//! [`ScopedClient`]s. What happens underneath depends on the transport's process scope:
//!
//! | scope    | transports             | acquisition                                         |
//! |----------|------------------------|-----------------------------------------------------|
//! | per-test | `pipe`                 | fresh worker; release stops it                       |
//! | session  | `subprocess`           | one shared pipe worker; release detaches only        |
//! | session  | `http`, `http-zstd`    | one server per (runtime, compression); new client    |
//!
//! Combinations whose runtime is not installed are collected as [`Collected::Skip`] so they are
//! reported as skipped, never as failures.

pub mod connector;
pub mod handle;
pub mod liveness;
pub mod session;

use std::sync::Arc;

use tracing::warn;
use vgi_matrix::{COMBINATIONS, Combination, CombinationInfo, ProcessScope};

pub use connector::{
    Binding, ConnectError, HttpTarget, LogLevel, LogRecord, LogSink, LogSubscription, PipeChannel, ServiceConnector,
    SharedPipe,
};
pub use handle::{ClientFuture, ScopedClient};
pub use liveness::{LivenessClient, LivenessConnector};
pub use session::{Session, SessionWorker};

use crate::errors::{HarnessError, HarnessResult};
use handle::OwnedWorker;

/// Outcome of collecting one parametrisation branch.
#[derive(Debug)]
pub enum Collected<T> {
    Ready(T),
    /// Not runnable on this host; the reason is shown in the report.
    Skip(String),
}

impl<T> Collected<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Collected::Ready(value) => Some(value),
            Collected::Skip(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            Collected::Ready(_) => None,
            Collected::Skip(reason) => Some(reason),
        }
    }
}

/// Every supported combination over one session and one connector.
pub struct ConnectionMatrix<C: ServiceConnector> {
    session: Arc<Session>,
    connector: Arc<C>,
}

impl<C: ServiceConnector> ConnectionMatrix<C> {
    pub fn new(session: Arc<Session>, connector: C) -> Self {
        Self {
            session,
            connector: Arc::new(connector),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    /// The parametrisation axis, in registry order.
    pub fn combinations() -> impl Iterator<Item = &'static CombinationInfo> {
        COMBINATIONS.iter()
    }

    /// Factory for one combination, or a skip when its runtime is unavailable.
    pub fn factory(&self, combination: Combination) -> HarnessResult<Collected<Factory<C>>> {
        let info = combination.info().ok_or(HarnessError::Unsupported { combination })?;
        if let Err(reason) = self.session.availability(combination) {
            return Ok(Collected::Skip(reason));
        }
        Ok(Collected::Ready(Factory {
            session: Arc::clone(&self.session),
            connector: Arc::clone(&self.connector),
            info,
        }))
    }

    /// Collect every combination.
    pub fn collect(&self) -> Vec<(&'static CombinationInfo, Collected<Factory<C>>)> {
        Self::combinations()
            .map(|info| {
                let collected = self
                    .factory(info.combination)
                    .unwrap_or_else(|err| Collected::Skip(err.to_string()));
                (info, collected)
            })
            .collect()
    }
}

/// Acquires scoped clients for one combination.
pub struct Factory<C: ServiceConnector> {
    session: Arc<Session>,
    connector: Arc<C>,
    info: &'static CombinationInfo,
}

impl<C: ServiceConnector> Clone for Factory<C> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            connector: Arc::clone(&self.connector),
            info: self.info,
        }
    }
}

impl<C: ServiceConnector> Factory<C> {
    pub fn combination(&self) -> Combination {
        self.info.combination
    }

    /// Parametrisation id, e.g. `"node-http-zstd"`.
    pub fn id(&self) -> &'static str {
        self.info.id
    }

    /// Open a client. Server log messages go to `on_log` until the handle is released.
    #[tracing::instrument(skip_all, fields(combination = self.info.id))]
    pub async fn acquire(&self, on_log: Option<LogSink>) -> HarnessResult<ScopedClient<C>> {
        let combination = self.combination();
        let logs = LogSubscription::new(on_log);
        let stop_timeout = self.session.config().stop_timeout;

        match combination.transport.scope() {
            ProcessScope::PerTest => {
                let mut process = self.session.launch(self.info).await?;
                let pid = process.pid();
                let Some((input, output)) = process.take_pipe() else {
                    let _ = process.stop(stop_timeout).await;
                    return Err(HarnessError::Unsupported { combination });
                };
                let pipe = PipeChannel::new(input, output).into_shared();
                let owned = OwnedWorker {
                    process,
                    pipe: Arc::clone(&pipe),
                };
                match self.connector.connect(Binding::Pipe(pipe), logs.clone()).await {
                    Ok(client) => Ok(ScopedClient::new(
                        combination,
                        client,
                        Arc::clone(&self.connector),
                        logs,
                        Some(owned),
                        Some(pid),
                        stop_timeout,
                    )),
                    Err(source) => {
                        logs.close();
                        if let Err(err) = owned.stop(stop_timeout).await {
                            warn!(error = %err, "could not stop worker after failed connect");
                        }
                        Err(HarnessError::Connect { combination, source })
                    }
                }
            }
            ProcessScope::Session => {
                let worker = self.session.shared_worker(combination).await?;
                match self.connector.connect(worker.binding().clone(), logs.clone()).await {
                    Ok(client) => Ok(ScopedClient::new(
                        combination,
                        client,
                        Arc::clone(&self.connector),
                        logs,
                        None,
                        Some(worker.pid()),
                        stop_timeout,
                    )),
                    Err(source) => {
                        logs.close();
                        Err(HarnessError::Connect { combination, source })
                    }
                }
            }
        }
    }

    /// Run `body` with a client, releasing it on every exit path that returns.
    ///
    /// ## Examples
    /// ```rust,ignore
    /// let greeting = factory
    ///     .with_client(None, |client| Box::pin(async move { client.ping().await }))
    ///     .await??;
    /// ```
    pub async fn with_client<T, F>(&self, on_log: Option<LogSink>, body: F) -> HarnessResult<T>
    where
        F: for<'c> FnOnce(&'c mut C::Client) -> ClientFuture<'c, T>,
    {
        let mut handle = self.acquire(on_log).await?;
        let value = body(handle.client()).await;
        handle.release().await?;
        Ok(value)
    }
}
