//! Session-scoped worker ownership.
//!
//! A [`Session`] owns every long-lived worker of one test run: the shared pipe worker of the
//! `subprocess` transport and one HTTP server per (runtime, compression) pair. Workers start on
//! first use. A fixture whose setup failed is remembered, so every later acquisition reports the
//! same [`HarnessError::Setup`] instead of relaunching. [`Session::shutdown`] is the teardown
//! hook; it stops each worker with the configured bound.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};
use vgi_matrix::{Combination, CombinationInfo, ProcessScope, TransportClass};

use super::connector::{Binding, HttpTarget, PipeChannel};
use crate::bundle::BundleBuilder;
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::readiness::{ProbeSettings, ReadinessKind, await_ready};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::worker::{WorkerCommand, WorkerLauncher, WorkerProcess, find_executable};

/// A session-scoped worker and the binding clients use to reach it.
#[derive(Debug)]
pub struct SessionWorker {
    combination: Combination,
    pid: u32,
    binding: Binding,
    process: Mutex<WorkerProcess>,
}

impl SessionWorker {
    pub fn combination(&self) -> Combination {
        self.combination
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    async fn stop(&self, config: &HarnessConfig) -> HarnessResult<()> {
        if let Binding::Pipe(pipe) = &self.binding {
            pipe.lock().await.close_input().await;
        }
        self.process.lock().await.stop(config.stop_timeout).await
    }
}

#[derive(Debug)]
enum Fixture {
    Ready(Arc<SessionWorker>),
    Failed(Arc<HarnessError>),
}

#[derive(Debug)]
pub struct Session {
    config: HarnessConfig,
    stats: Arc<SessionStats>,
    launcher: WorkerLauncher,
    builder: BundleBuilder,
    fixtures: Mutex<HashMap<Combination, Fixture>>,
}

impl Session {
    pub fn new(config: HarnessConfig) -> Arc<Self> {
        let stats = Arc::new(SessionStats::default());
        Arc::new(Self {
            launcher: WorkerLauncher::new(Arc::clone(&stats)),
            builder: BundleBuilder::new(config.bundler.clone(), Arc::clone(&stats)),
            config,
            stats,
            fixtures: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn builder(&self) -> &BundleBuilder {
        &self.builder
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// `Err(reason)` when the combination's runtime cannot run on this host.
    pub fn availability(&self, combination: Combination) -> Result<(), String> {
        let runtime = combination.runtime;
        let program = self.config.executable(runtime);
        match find_executable(program) {
            Some(_) => Ok(()),
            None => Err(format!("{runtime} not available (`{program}` not found)")),
        }
    }

    /// File the combination's runtime executes, building its bundle if needed.
    pub async fn worker_file(&self, info: &CombinationInfo) -> HarnessResult<PathBuf> {
        let entry = self.config.entry_path(info);
        let bundle = self.config.bundle_path(info);
        self.builder
            .prepare(&entry, info.combination.runtime, bundle.as_deref())
            .await
    }

    /// Build (if needed), launch and await readiness for one worker of `info`.
    ///
    /// A worker that fails readiness, or exits during the startup grace, is stopped before the
    /// error is returned.
    #[tracing::instrument(skip_all, fields(combination = info.id))]
    pub async fn launch(&self, info: &CombinationInfo) -> HarnessResult<WorkerProcess> {
        let file = self.worker_file(info).await?;
        let command = WorkerCommand::for_combination(&self.config, info, &file);
        let transport = info.combination.transport;
        let mut process = self.launcher.start(command, transport).await?;

        let started = match ReadinessKind::for_transport(transport) {
            Some(kind) => {
                let settings = ProbeSettings {
                    timeout: self.config.ready_timeout_for(info.combination.runtime),
                    poll_interval: self.config.poll_interval,
                };
                await_ready(&mut process, &kind, settings).await.map(|_| ())
            }
            None => process.await_startup(self.config.startup_grace).await,
        };
        if let Err(err) = started {
            if let Err(stop_err) = process.stop(self.config.stop_timeout).await {
                warn!(error = %stop_err, "could not stop worker after failed startup");
            }
            return Err(err);
        }
        Ok(process)
    }

    /// The session-scoped worker for `combination`, started on first use.
    pub async fn shared_worker(&self, combination: Combination) -> HarnessResult<Arc<SessionWorker>> {
        let info = combination
            .info()
            .filter(|info| info.combination.transport.scope() == ProcessScope::Session)
            .ok_or(HarnessError::Unsupported { combination })?;

        let mut fixtures = self.fixtures.lock().await;
        match fixtures.get(&combination) {
            Some(Fixture::Ready(worker)) => return Ok(Arc::clone(worker)),
            Some(Fixture::Failed(cause)) => {
                return Err(HarnessError::Setup {
                    fixture: info.id.to_string(),
                    cause: Arc::clone(cause),
                });
            }
            None => {}
        }

        match self.start_shared(info).await {
            Ok(worker) => {
                let worker = Arc::new(worker);
                fixtures.insert(combination, Fixture::Ready(Arc::clone(&worker)));
                Ok(worker)
            }
            Err(err) => {
                error!(combination = info.id, error = %err, "fixture setup failed");
                let cause = Arc::new(err);
                fixtures.insert(combination, Fixture::Failed(Arc::clone(&cause)));
                Err(HarnessError::Setup {
                    fixture: info.id.to_string(),
                    cause,
                })
            }
        }
    }

    async fn start_shared(&self, info: &CombinationInfo) -> HarnessResult<SessionWorker> {
        let combination = info.combination;
        let mut process = self.launch(info).await?;
        let binding = match combination.transport.class() {
            TransportClass::ProcessPipe => match process.take_pipe() {
                Some((input, output)) => Binding::Pipe(PipeChannel::new(input, output).into_shared()),
                None => {
                    let _ = process.stop(self.config.stop_timeout).await;
                    return Err(missing_channel(&process, "stdin/stdout"));
                }
            },
            TransportClass::Network => match process.endpoint() {
                Some(endpoint) => Binding::Http(HttpTarget {
                    base_url: endpoint.base_url(),
                    compression_level: self.compression_for(combination),
                }),
                None => {
                    let _ = process.stop(self.config.stop_timeout).await;
                    return Err(missing_channel(&process, "endpoint"));
                }
            },
        };
        info!(combination = info.id, pid = process.pid(), binding = binding.kind(), "session worker ready");
        Ok(SessionWorker {
            combination,
            pid: process.pid(),
            binding,
            process: Mutex::new(process),
        })
    }

    /// Client-side compression level: `0` for plain transports.
    pub fn compression_for(&self, combination: Combination) -> u32 {
        if combination.transport.is_compressed() {
            self.config.compression_level
        } else {
            0
        }
    }

    /// Pid of the running session worker for `combination`, if one was started.
    pub async fn worker_pid(&self, combination: Combination) -> Option<u32> {
        match self.fixtures.lock().await.get(&combination) {
            Some(Fixture::Ready(worker)) => Some(worker.pid()),
            _ => None,
        }
    }

    /// Stop every session worker. Returns the first failure after attempting all of them.
    #[tracing::instrument(skip_all)]
    pub async fn shutdown(&self) -> HarnessResult<()> {
        let fixtures: Vec<(Combination, Fixture)> = self.fixtures.lock().await.drain().collect();
        let mut first_error = None;
        for (combination, fixture) in fixtures {
            let Fixture::Ready(worker) = fixture else {
                continue;
            };
            if let Err(err) = worker.stop(&self.config).await {
                error!(%combination, error = %err, "session worker teardown failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn missing_channel(process: &WorkerProcess, what: &str) -> HarnessError {
    HarnessError::Io {
        context: format!("worker `{}` has no {what}", process.command()),
        source: std::io::Error::new(std::io::ErrorKind::NotConnected, "channel unavailable"),
    }
}
