//! Monitor lifecycle and scheduling
//!
//! ```text
//!   STOPPED ──start()──▶ STARTING ──▶ RUNNING ──stop()──▶ STOPPING ──▶ STOPPED
//! ```
//!
//! `start()` spawns two independent periodic tasks on the ambient tokio
//! runtime: the sampling cadence and, when deadlock detection is enabled,
//! the alert cadence. Each tick runs on the blocking pool. On shutdown a
//! task schedules no further ticks but lets the current one finish; `stop()`
//! gives it the grace period and then aborts the task, and a tick abandoned
//! that way publishes nothing.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::listener::{ListenerId, ListenerSet, MonitorListener};
use super::sampling::Sampler;
use super::stats::MonitorStats;
use crate::config::MonitorConfig;
use crate::detection::DetectorRegistry;
use crate::domain::{MonitorError, ProviderError, SnapshotBatch};
use crate::provider::ThreadIntrospector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// How often `stop()` re-checks a pending start or a busy listener
const DRAIN_POLL: Duration = Duration::from_millis(5);

type StopHandles = (Option<watch::Sender<bool>>, Vec<(&'static str, JoinHandle<()>)>);

struct Lifecycle {
    state: MonitorState,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

/// Periodic thread-state monitor.
///
/// Construct with a configuration value and a provider, register listeners,
/// then [`start`](Self::start) it from inside a tokio runtime.
pub struct Monitor {
    sampler: Arc<Sampler>,
    registry: Arc<DetectorRegistry>,
    listeners: Arc<ListenerSet>,
    stats: Arc<MonitorStats>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("state", &self.state())
            .field("registry", &self.registry)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Build a stopped monitor. The built-in detectors enabled by `config`
    /// are registered immediately so [`snapshot_now`](Self::snapshot_now)
    /// works before the first `start()`.
    ///
    /// # Errors
    /// Returns [`MonitorError::Config`] if `config` fails validation.
    pub fn new(
        config: MonitorConfig,
        provider: Arc<dyn ThreadIntrospector>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;

        let registry = Arc::new(DetectorRegistry::new());
        registry.install_defaults(&config);
        let listeners = Arc::new(ListenerSet::new());
        let stats = Arc::new(MonitorStats::new());
        let sampler = Arc::new(Sampler::new(
            config,
            provider,
            Arc::clone(&registry),
            Arc::clone(&listeners),
            Arc::clone(&stats),
        ));

        Ok(Self {
            sampler,
            registry,
            listeners,
            stats,
            lifecycle: Mutex::new(Lifecycle {
                state: MonitorState::Stopped,
                shutdown: None,
                tasks: Vec::new(),
            }),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        self.sampler.config()
    }

    pub fn state(&self) -> MonitorState {
        self.lifecycle().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == MonitorState::Running
    }

    /// Detector set; changes take effect on the next tick.
    pub fn registry(&self) -> &Arc<DetectorRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn add_listener(&self, listener: Arc<dyn MonitorListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Start the sampling (and alert) cadence.
    ///
    /// A no-op when already running, or when the configuration disables the
    /// monitor.
    ///
    /// # Errors
    /// Returns [`MonitorError::NoRuntime`] when called outside a tokio runtime.
    pub fn start(&self) -> Result<(), MonitorError> {
        let config = self.sampler.config();
        if !config.enabled {
            info!("Thread monitoring disabled by configuration");
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        {
            let mut lifecycle = self.lifecycle();
            match lifecycle.state {
                MonitorState::Stopped => {}
                MonitorState::Starting | MonitorState::Running => {
                    debug!("Monitor already running");
                    return Ok(());
                }
                MonitorState::Stopping => {
                    warn!("Monitor is still stopping; start() ignored");
                    return Ok(());
                }
            }
            lifecycle.state = MonitorState::Starting;
        }

        // Re-adds a built-in removed while stopped
        self.registry.install_defaults(config);

        if !self.sampler.provider().supports_cpu_time() {
            info!("Provider does not report CPU time; cpu_time_nanos will be empty");
        }

        // Listeners hear about the start before the first snapshot can arrive
        let failures = self.listeners.deliver("start", |l| l.on_started());
        self.stats.record_listener_failures(failures);

        self.listeners.open();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let now = Instant::now();
        let mut tasks = vec![(
            "sampling",
            runtime.spawn(run_periodic(
                "sampling",
                Arc::clone(&self.sampler),
                now,
                config.sampling.interval,
                shutdown_rx.clone(),
                Sampler::run_tick,
            )),
        )];
        if config.deadlock.enabled {
            tasks.push((
                "deadlock alert",
                runtime.spawn(run_periodic(
                    "deadlock alert",
                    Arc::clone(&self.sampler),
                    now + config.deadlock.alert_interval,
                    config.deadlock.alert_interval,
                    shutdown_rx,
                    Sampler::run_alert_tick,
                )),
            ));
        }

        {
            let mut lifecycle = self.lifecycle();
            lifecycle.shutdown = Some(shutdown_tx);
            lifecycle.tasks = tasks;
            lifecycle.state = MonitorState::Running;
        }

        info!(
            "Thread monitor started (sampling every {:?}, detectors: {})",
            config.sampling.interval,
            self.registry.names().join(", ")
        );
        Ok(())
    }

    /// Stop both cadences, waiting at most the configured grace period for
    /// in-flight ticks before aborting them.
    ///
    /// Called while another thread is inside `start()`, this waits (again at
    /// most the grace period) for the start to finish and then stops. A no-op
    /// when the monitor is not running.
    pub async fn stop(&self) {
        let grace = self.sampler.config().sampling.shutdown_grace;
        let Some((shutdown, tasks)) = self.begin_stop(Instant::now() + grace).await else {
            return;
        };

        if let Some(shutdown) = shutdown {
            shutdown.send_replace(true);
        }

        let deadline = Instant::now() + grace;
        for (name, task) in tasks {
            let abort = task.abort_handle();
            match time::timeout_at(deadline, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => warn!("The {name} task panicked: {e}"),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("The {name} task did not stop within the grace period; aborting");
                    abort.abort();
                }
            }
        }

        // A listener may still be busy with a tick abandoned above
        self.listeners.close();
        let drain_deadline = Instant::now() + grace;
        while self.listeners.in_flight() > 0 {
            if Instant::now() >= drain_deadline {
                warn!("A listener is still handling an abandoned tick; reporting stop anyway");
                break;
            }
            time::sleep(DRAIN_POLL).await;
        }

        self.lifecycle().state = MonitorState::Stopped;
        info!("Thread monitor stopped");
        let failures = self.listeners.deliver("stop", |l| l.on_stopped());
        self.stats.record_listener_failures(failures);
    }

    /// Run one full tick (fetch, detect, annotate) and return the batch
    /// without publishing it. Works whether or not the monitor is running.
    ///
    /// # Errors
    /// Returns [`MonitorError::Provider`] if the provider call fails.
    pub async fn snapshot_now(&self) -> Result<SnapshotBatch, MonitorError> {
        let sampler = Arc::clone(&self.sampler);
        let batch = tokio::task::spawn_blocking(move || sampler.take_snapshot())
            .await
            .map_err(|e| ProviderError::TaskFailed(e.to_string()))??;
        Ok(batch)
    }

    /// Move RUNNING to STOPPING and take the shutdown handles. Waits out a
    /// concurrent `start()` until `deadline`.
    async fn begin_stop(&self, deadline: Instant) -> Option<StopHandles> {
        loop {
            {
                let mut lifecycle = self.lifecycle();
                match lifecycle.state {
                    MonitorState::Running => {
                        lifecycle.state = MonitorState::Stopping;
                        return Some((
                            lifecycle.shutdown.take(),
                            std::mem::take(&mut lifecycle.tasks),
                        ));
                    }
                    MonitorState::Starting => {}
                    MonitorState::Stopped | MonitorState::Stopping => {
                        debug!("Monitor not running; stop() ignored");
                        return None;
                    }
                }
            }
            if Instant::now() >= deadline {
                warn!("Monitor still starting after the grace period; stop() ignored");
                return None;
            }
            time::sleep(DRAIN_POLL).await;
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.listeners.close();
        let lifecycle = self.lifecycle.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in lifecycle.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Drive `tick` on the blocking pool every `period`, starting at `first`,
/// until the shutdown signal flips or its sender is dropped.
fn run_periodic(
    name: &'static str,
    sampler: Arc<Sampler>,
    first: Instant,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: fn(&Sampler) -> Result<(), ProviderError>,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let mut ticker = time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            // Shutdown does not interrupt a running tick; stop() bounds it
            let worker = Arc::clone(&sampler);
            let result = tokio::task::spawn_blocking(move || tick(&worker)).await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Skipping {name} tick: {e}");
                    sampler.stats().record_provider_failure();
                }
                Err(e) => {
                    warn!("The {name} tick did not complete: {e}");
                    sampler.stats().record_provider_failure();
                }
            }
        }
        debug!("The {name} loop exited");
    }
}
