//! The top-level controller: owns every manager, the reaper and signal
//! routing, and mediates reload and shutdown.

mod reload;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigReloader, ServiceConfig};
use crate::event::broadcaster::{EventBroadcaster, EventSubscriber};
use crate::event::{Event, EventKind};
use crate::exec::{Executor, UnixExecutor};
use crate::kernel::reaper::{ChildRegistry, ZombieReaper};
use crate::kernel::signal::{self, SignalMonitor};
use crate::kernel::{credentials, is_pid_one, KernelError};
use crate::manager::{Manager, ManagerError, ManagerStatus};

/// Margin on top of a service's stop timeout covering SIGKILL delivery and
/// the final reap.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Owns the full manager set. One instance per daemon.
pub struct Supervisor<R: ConfigReloader> {
    config: Config,
    reloader: R,
    managers: BTreeMap<String, Manager>,
    executor: Arc<dyn Executor>,
    reaper: ZombieReaper,
    signals: SignalMonitor,
    events: EventBroadcaster<Event>,
}

impl<R: ConfigReloader> Supervisor<R> {
    pub fn new(config: Config, reloader: R) -> Self {
        let registry = Arc::new(ChildRegistry::default());
        Self {
            config,
            reloader,
            managers: BTreeMap::new(),
            executor: Arc::new(UnixExecutor::new(registry.clone())),
            reaper: ZombieReaper::new(registry),
            signals: SignalMonitor::new(),
            events: EventBroadcaster::default(),
        }
    }

    /// Lifecycle event feed for observers (control surface, TUI). Slow
    /// consumers lose old events instead of slowing the supervisor.
    pub fn subscribe(&self) -> EventSubscriber<Event> {
        self.events.subscribe()
    }

    /// Non-blocking status snapshot of every service.
    pub fn status(&self) -> BTreeMap<String, ManagerStatus> {
        self.managers
            .iter()
            .map(|(name, manager)| (name.clone(), manager.status()))
            .collect()
    }

    pub fn start(&self, name: &str) -> Result<(), SupervisorError> {
        Ok(self.manager(name)?.start()?)
    }

    pub fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        Ok(self.manager(name)?.stop()?)
    }

    pub fn restart(&self, name: &str) -> Result<(), SupervisorError> {
        Ok(self.manager(name)?.restart()?)
    }

    fn manager(&self, name: &str) -> Result<&Manager, SupervisorError> {
        self.managers
            .get(name)
            .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))
    }

    /// Claims the subreaper flag, starts the reaper and launches every
    /// configured service.
    pub fn start_all(&mut self) -> Result<(), SupervisorError> {
        if is_pid_one() {
            debug!("running as PID 1, orphans re-parent here natively");
        } else {
            match signal::set_child_subreaper() {
                Ok(()) => debug!("child subreaper flag set"),
                Err(err) if err.is_not_supported() => {
                    warn!("subreaper unavailable, reaping limited to direct children");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let sigchld = self.signals.notify(&[Signal::SIGCHLD])?;
        self.reaper.start(sigchld);

        for service in self.config.services.clone() {
            self.spawn_and_start(service);
        }
        Ok(())
    }

    fn spawn_and_start(&mut self, config: ServiceConfig) {
        let name = config.name.clone();
        let manager = Manager::spawn(config, self.executor.clone(), self.events.clone());
        if let Err(err) = manager.start() {
            warn!(service = name, error = %err, "initial start rejected");
        }
        self.managers.insert(name, manager);
    }

    /// Blocks routing signals until a termination signal arrives, then shuts
    /// everything down.
    pub fn run(mut self) -> Result<(), SupervisorError> {
        let lifecycle = self.signals.notify(&[
            Signal::SIGTERM,
            Signal::SIGINT,
            Signal::SIGQUIT,
            Signal::SIGHUP,
        ])?;

        self.start_all()?;
        info!(services = self.managers.len(), "supervisor running");

        while let Some(sig) = lifecycle.recv() {
            if signal::is_term_signal(sig) {
                info!(signal = %sig, "termination signal received");
                break;
            }
            if signal::is_reload_signal(sig) {
                info!("reload signal received");
                self.reload_all();
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Re-reads the config and applies the difference. A load or validation
    /// failure keeps the current config in effect.
    pub fn reload_all(&mut self) {
        match self.reloader.reload() {
            Ok(new_config) => match crate::config::validate(&new_config) {
                Ok(()) => self.apply_config(new_config),
                Err(err) => {
                    error!(error = %err, "reloaded config is invalid, keeping current config");
                }
            },
            Err(err) => error!(error = %err, "reload failed, keeping current config"),
        }
    }

    fn apply_config(&mut self, new_config: Config) {
        let plan = reload::diff(&self.config.services, &new_config.services);
        info!(
            added = plan.added.len(),
            removed = plan.removed.len(),
            changed = plan.changed.len(),
            unchanged = plan.unchanged.len(),
            "applying reloaded config"
        );

        for name in &plan.removed {
            if let Some(manager) = self.managers.remove(name) {
                info!(service = name, "service removed by reload");
                manager.shutdown(self.stop_deadline(name));
            }
        }

        // Services whose replacement config is unusable keep their current
        // config and manager.
        let mut rejected = Vec::new();
        for service in &plan.changed {
            if let Err(err) = credentials::resolve(&service.user, &service.group) {
                error!(service = service.name, error = %err, "reload rejected for service");
                self.events.broadcast(Event::now(
                    &service.name,
                    EventKind::Error {
                        message: format!("reload rejected: {err}"),
                    },
                ));
                rejected.push(service.name.clone());
                continue;
            }
            if let Some(old) = self.managers.remove(&service.name) {
                info!(service = service.name, "service changed by reload, cycling");
                old.shutdown(self.stop_deadline(&service.name));
            }
            self.spawn_and_start(service.clone());
        }

        for service in plan.added {
            info!(service = service.name, "service added by reload");
            self.spawn_and_start(service);
        }

        // Unchanged services are left alone, except that a configured reload
        // signal is forwarded to them.
        for name in &plan.unchanged {
            if let (Some(manager), Some(service)) =
                (self.managers.get(name), new_config.service(name))
            {
                if service.reload_signal.is_some() {
                    let _ = manager.reload(service.clone());
                }
            }
        }

        // Record the effective config: the new one, except rejected services
        // retain their previous entry.
        let mut effective = new_config;
        for service in effective.services.iter_mut() {
            if rejected.contains(&service.name) {
                if let Some(old) = self.config.service(&service.name) {
                    *service = old.clone();
                }
            }
        }
        self.config = effective;
    }

    fn stop_deadline(&self, name: &str) -> Duration {
        let timeout = self
            .config
            .service(name)
            .map(|s| Duration::from(s.stop_timeout))
            .unwrap_or_default();
        timeout + SHUTDOWN_GRACE
    }

    /// Stops every manager in parallel, bounded by the largest stop timeout
    /// plus grace, then stops the reaper last.
    pub fn shutdown(&mut self) {
        info!("stopping all services");
        for manager in self.managers.values() {
            manager.begin_shutdown();
        }

        let deadline = self
            .config
            .services
            .iter()
            .map(|s| Duration::from(s.stop_timeout))
            .max()
            .unwrap_or_default()
            + SHUTDOWN_GRACE;
        for (_, manager) in std::mem::take(&mut self.managers) {
            manager.shutdown(deadline);
        }

        self.reaper.stop();
        self.signals.stop();
        info!("supervisor stopped");
    }
}
