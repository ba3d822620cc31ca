//! Auxiliary service manager.
//!
//! Tracks the declared external tool integrations handlers depend on
//! (stopped/starting/running/error) and best-effort starts them before
//! a step runs. A startup failure is logged as a warning and never
//! blocks the step; unmet dependencies surface later as ordinary skill
//! failures. No service-specific protocol is implemented here.

use reflex_core::{ServiceSpec, ServiceStatus};
use std::collections::HashMap;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct ServiceState {
    status: ServiceStatus,
    child: Option<Child>,
}

/// Tracks and best-effort starts declared auxiliary services.
pub struct ServiceManager {
    specs: HashMap<String, ServiceSpec>,
    state: Mutex<HashMap<String, ServiceState>>,
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("services", &self.specs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ServiceManager {
    pub fn new(specs: impl IntoIterator<Item = ServiceSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Current status of a service.
    pub async fn status(&self, name: &str) -> ServiceStatus {
        let mut state = self.state.lock().await;
        match state.get_mut(name) {
            Some(service) => {
                Self::probe(name, service);
                service.status
            }
            None => ServiceStatus::Stopped,
        }
    }

    /// Best-effort start of a service if it is not already running.
    ///
    /// Returns the resulting status. Unknown and command-less services
    /// never block a step: an unknown name is an error status, a
    /// declared service without a command is assumed externally managed
    /// and reported running.
    pub async fn ensure_started(&self, name: &str) -> ServiceStatus {
        let Some(spec) = self.specs.get(name) else {
            warn!(service = name, "unknown auxiliary service");
            return ServiceStatus::Error;
        };

        let mut state = self.state.lock().await;
        let service = state.entry(name.to_string()).or_insert(ServiceState {
            status: ServiceStatus::Stopped,
            child: None,
        });
        Self::probe(name, service);

        if service.status == ServiceStatus::Running {
            return ServiceStatus::Running;
        }

        let Some(command) = &spec.command else {
            // Declared without a command: externally managed.
            debug!(service = name, "service has no start command, assuming available");
            service.status = ServiceStatus::Running;
            return ServiceStatus::Running;
        };

        service.status = ServiceStatus::Starting;
        match Command::new(command).args(&spec.args).spawn() {
            Ok(child) => {
                info!(service = name, command, "started auxiliary service");
                service.child = Some(child);
                service.status = ServiceStatus::Running;
            }
            Err(e) => {
                warn!(service = name, command, error = %e, "failed to start auxiliary service");
                service.child = None;
                service.status = ServiceStatus::Error;
            }
        }
        service.status
    }

    /// Stop a service if this manager started it.
    pub async fn stop(&self, name: &str) -> ServiceStatus {
        let mut state = self.state.lock().await;
        let Some(service) = state.get_mut(name) else {
            return ServiceStatus::Stopped;
        };

        if let Some(child) = service.child.as_mut() {
            if let Err(e) = child.kill().await {
                warn!(service = name, error = %e, "failed to kill auxiliary service");
            }
        }
        service.child = None;
        service.status = ServiceStatus::Stopped;
        ServiceStatus::Stopped
    }

    /// Stop every service this manager started.
    pub async fn stop_all(&self) {
        let names: Vec<String> = {
            let state = self.state.lock().await;
            state.keys().cloned().collect()
        };
        for name in names {
            self.stop(&name).await;
        }
    }

    /// Refresh status from the child process, if any.
    fn probe(name: &str, service: &mut ServiceState) {
        if let Some(child) = service.child.as_mut() {
            match child.try_wait() {
                Ok(Some(exit)) => {
                    warn!(service = name, status = %exit, "auxiliary service exited");
                    service.child = None;
                    service.status = ServiceStatus::Stopped;
                }
                Ok(None) => {
                    service.status = ServiceStatus::Running;
                }
                Err(e) => {
                    warn!(service = name, error = %e, "failed to probe auxiliary service");
                    service.child = None;
                    service.status = ServiceStatus::Error;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, command: Option<&str>) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            command: command.map(str::to_string),
            args: Vec::new(),
        }
    }

    #[tokio::test]
    async fn unknown_service_reports_error() {
        let manager = ServiceManager::new(Vec::new());
        assert_eq!(manager.ensure_started("ghost").await, ServiceStatus::Error);
    }

    #[tokio::test]
    async fn commandless_service_is_assumed_available() {
        let manager = ServiceManager::new(vec![spec("external-db", None)]);
        assert_eq!(
            manager.ensure_started("external-db").await,
            ServiceStatus::Running
        );
        assert_eq!(manager.status("external-db").await, ServiceStatus::Running);
    }

    #[tokio::test]
    async fn missing_binary_reports_error_without_blocking() {
        let manager = ServiceManager::new(vec![spec(
            "broken",
            Some("definitely-not-a-real-binary-name"),
        )]);
        assert_eq!(manager.ensure_started("broken").await, ServiceStatus::Error);
    }

    #[tokio::test]
    async fn untouched_service_is_stopped() {
        let manager = ServiceManager::new(vec![spec("idle", None)]);
        assert_eq!(manager.status("idle").await, ServiceStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_service_runs_and_stops() {
        let manager = ServiceManager::new(vec![ServiceSpec {
            name: "sleeper".to_string(),
            command: Some("sleep".to_string()),
            args: vec!["30".to_string()],
        }]);

        assert_eq!(
            manager.ensure_started("sleeper").await,
            ServiceStatus::Running
        );
        assert_eq!(manager.status("sleeper").await, ServiceStatus::Running);

        assert_eq!(manager.stop("sleeper").await, ServiceStatus::Stopped);
        assert_eq!(manager.status("sleeper").await, ServiceStatus::Stopped);
    }
}
