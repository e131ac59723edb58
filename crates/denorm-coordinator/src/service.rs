//! Coordinator service — startup provisioning and the periodic control loop.
//!
//! One task drives the lifecycle cycle: it waits `initial_delay`, then runs
//! a cycle on every tick of a fixed interval. A cycle always finishes before
//! the next tick is taken, and missed ticks are delayed rather than burst.
//!
//! Fatal errors stop the loop and leave the service in
//! [`CoordinatorState::Failed`]. Anything else is logged and retried on the
//! next tick.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use denorm_core::CoordinatorConfig;
use denorm_metrics::Telemetry;

use crate::error::CoordinatorResult;
use crate::lifecycle::LifecycleCoordinator;
use crate::provisioner::{GenerationMarker, TopicProvisioner};

/// Lifecycle of the coordinator service itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoordinatorState {
    Running,
    Stopped,
    Failed,
}

pub struct CoordinatorService {
    coordinator: LifecycleCoordinator,
    provisioner: TopicProvisioner,
    initial_delay: Duration,
    cycle_interval: Duration,
    shutdown_grace: Duration,
    telemetry: Option<Arc<Telemetry>>,
}

impl CoordinatorService {
    pub fn new(
        coordinator: LifecycleCoordinator,
        provisioner: TopicProvisioner,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            coordinator,
            provisioner,
            initial_delay: config.initial_delay,
            cycle_interval: config.cycle_interval,
            shutdown_grace: config.shutdown_grace,
            telemetry: None,
        }
    }

    /// Count service failures and every lifecycle cycle into `telemetry`.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.coordinator = self.coordinator.with_telemetry(telemetry.clone());
        self.telemetry = Some(telemetry);
        self
    }

    /// Provision topics, then spawn the control loop.
    ///
    /// A provisioning failure is returned and no loop is started.
    pub async fn start(self) -> CoordinatorResult<CoordinatorHandle> {
        let marker = match self.provisioner.provision().await {
            Ok(marker) => marker,
            Err(e) => {
                error!(error = %e, "topic provisioning failed, coordinator not started");
                if let Some(t) = &self.telemetry {
                    t.record_coordinator_failure();
                }
                return Err(e);
            }
        };

        let (state_tx, state_rx) = watch::channel(CoordinatorState::Running);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(
            generation = %marker.generation,
            initial_delay_ms = self.initial_delay.as_millis() as u64,
            interval_secs = self.cycle_interval.as_secs(),
            "coordinator started"
        );

        let task = tokio::spawn(control_loop(
            Arc::new(self.coordinator),
            self.initial_delay,
            self.cycle_interval,
            shutdown_rx,
            state_tx,
            self.telemetry,
        ));

        Ok(CoordinatorHandle {
            marker,
            state: state_rx,
            shutdown: shutdown_tx,
            task,
            grace: self.shutdown_grace,
        })
    }
}

async fn control_loop(
    coordinator: Arc<LifecycleCoordinator>,
    initial_delay: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    state: watch::Sender<CoordinatorState>,
    telemetry: Option<Arc<Telemetry>>,
) -> CoordinatorResult<()> {
    tokio::select! {
        _ = tokio::time::sleep(initial_delay) => {}
        _ = shutdown.changed() => {
            info!("coordinator stopped before first cycle");
            state.send_replace(CoordinatorState::Stopped);
            return Ok(());
        }
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match coordinator.run_cycle().await {
                    Ok(outcome) => debug!(
                        accepted = outcome.accept.accepted.len(),
                        waiting = outcome.accept.waiting.len(),
                        bootstrapped = outcome.bootstrap.as_ref().map_or(0, |b| b.bootstrapped.len()),
                        "coordinator cycle complete"
                    ),
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "coordinator failed");
                        if let Some(t) = &telemetry {
                            t.record_coordinator_failure();
                        }
                        state.send_replace(CoordinatorState::Failed);
                        return Err(e);
                    }
                    Err(e) => warn!(error = %e, "coordinator cycle failed, retrying next tick"),
                }
            }
            _ = shutdown.changed() => {
                info!("coordinator shutting down");
                state.send_replace(CoordinatorState::Stopped);
                return Ok(());
            }
        }
    }
}

/// Control handle for a started coordinator.
pub struct CoordinatorHandle {
    marker: GenerationMarker,
    state: watch::Receiver<CoordinatorState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<CoordinatorResult<()>>,
    grace: Duration,
}

impl CoordinatorHandle {
    /// The generation marker published at startup.
    pub fn marker(&self) -> &GenerationMarker {
        &self.marker
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Watch state changes, e.g. to react to `Failed`.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.clone()
    }

    /// Signal the loop to stop and wait up to the grace period.
    ///
    /// A loop that overruns the grace period is aborted and the overrun
    /// logged; the caller is never blocked past the grace period. The
    /// loop's own fatal error, if it had one, is returned.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        // Fails only if the loop has already exited.
        let _ = self.shutdown.send(true);

        let mut task = self.task;
        match tokio::time::timeout(self.grace, &mut task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join)) => Err(anyhow::anyhow!("coordinator task panicked: {join}")),
            Err(_) => {
                error!(
                    grace_secs = self.grace.as_secs_f64(),
                    "coordinator still running after grace period, aborting"
                );
                task.abort();
                Ok(())
            }
        }
    }
}
