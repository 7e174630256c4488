// ── Capture-service supervisor ──
//
// Keeps the platform's server-side capture process running for the
// active scope. The client holds no connection for this; it only asks
// for status and issues start/stop with bounded retries.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use vigil_api::ApiClient;

use crate::backoff::BackoffPolicy;
use crate::config::{Scope, SyncConfig};
use crate::error::CoreError;
use crate::model::ServiceStatus;

// ── Control plane seam ───────────────────────────────────────────────

/// The three control calls the supervisor issues.
pub trait ControlPlane: Send + Sync + 'static {
    fn status(&self) -> impl Future<Output = Result<ServiceStatus, CoreError>> + Send;

    /// Start the capture process. Returns the status reported with the
    /// acknowledgement, if any.
    fn start(
        &self,
        scope: &Scope,
    ) -> impl Future<Output = Result<Option<ServiceStatus>, CoreError>> + Send;

    fn stop(&self, scope: &Scope) -> impl Future<Output = Result<(), CoreError>> + Send;
}

impl ControlPlane for ApiClient {
    async fn status(&self) -> Result<ServiceStatus, CoreError> {
        Ok(self.service_status().await?.into())
    }

    async fn start(&self, scope: &Scope) -> Result<Option<ServiceStatus>, CoreError> {
        let resp = self.start_service(&scope.location_id).await?;
        Ok(resp.status.map(ServiceStatus::from))
    }

    async fn stop(&self, scope: &Scope) -> Result<(), CoreError> {
        self.stop_service(&scope.location_id).await?;
        Ok(())
    }
}

// ── States ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    /// Start attempts exhausted or credentials rejected. Stays here until
    /// an explicit retry.
    Failed,
}

impl SupervisorState {
    /// Legal edges. Staying put is always allowed.
    pub fn can_transition_to(self, next: Self) -> bool {
        self == next
            || matches!(
                (self, next),
                (Self::Idle, Self::Starting | Self::Running)
                    | (Self::Starting, Self::Running | Self::Failed | Self::Idle)
                    | (Self::Running, Self::Starting | Self::Idle)
                    | (Self::Failed, Self::Starting | Self::Running | Self::Idle)
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FailureKind {
    ServiceUnavailable,
    Authorization,
}

/// The single user-visible failure indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalFailure {
    pub kind: FailureKind,
    /// Last underlying error.
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl SupervisorConfig {
    pub fn from_sync_config(config: &SyncConfig) -> Self {
        Self {
            timeout: config.control_timeout,
            max_attempts: config.control_max_attempts,
            backoff: config.control_backoff,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            timeout: SyncConfig::DEFAULT_CONTROL_TIMEOUT,
            max_attempts: SyncConfig::DEFAULT_CONTROL_MAX_ATTEMPTS,
            backoff: BackoffPolicy::control_plane(),
        }
    }
}

// ── Supervisor ───────────────────────────────────────────────────────

pub struct ConnectionSupervisor<C: ControlPlane> {
    control: C,
    config: SupervisorConfig,
    state: watch::Sender<SupervisorState>,
    status: watch::Sender<ServiceStatus>,
    failure: watch::Sender<Option<TerminalFailure>>,
}

impl<C: ControlPlane> ConnectionSupervisor<C> {
    pub fn new(control: C, config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        let (status, _) = watch::channel(ServiceStatus::stopped());
        let (failure, _) = watch::channel(None);
        Self {
            control,
            config,
            state,
            status,
            failure,
        }
    }

    /// Query the capture service once. No retry; errors go to the caller
    /// and leave the state untouched.
    pub async fn check_status(&self) -> Result<ServiceStatus, CoreError> {
        let status = self.bounded(self.control.status()).await?;
        self.status.send_replace(status.clone());

        let current = self.current_state();
        if status.is_running {
            if current != SupervisorState::Starting {
                self.transition(SupervisorState::Running);
                self.clear_failure();
            }
        } else if current == SupervisorState::Running {
            self.transition(SupervisorState::Idle);
        }
        Ok(status)
    }

    /// Start the capture service for `scope`, retrying with backoff up to
    /// the attempt budget. Exhaustion parks the supervisor in `Failed`.
    pub async fn start(&self, scope: &Scope) -> Result<(), CoreError> {
        self.transition(SupervisorState::Starting);
        let max = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.bounded(self.control.start(scope)).await {
                Ok(reported) => {
                    let status = reported.unwrap_or_else(|| ServiceStatus {
                        is_running: true,
                        ..ServiceStatus::stopped()
                    });
                    self.status.send_replace(status);
                    self.transition(SupervisorState::Running);
                    self.clear_failure();
                    info!(location = %scope.location_id, attempts = attempt + 1, "capture service running");
                    return Ok(());
                }
                Err(err) if err.is_authorization() => {
                    warn!(error = %err, "capture service start rejected credentials");
                    self.fail(FailureKind::Authorization, err.to_string());
                    return Err(err);
                }
                Err(err) => {
                    if self.config.backoff.should_give_up(attempt, max) {
                        let message = err.to_string();
                        warn!(attempts = max, error = %message, "capture service start failed");
                        self.fail(FailureKind::ServiceUnavailable, message.clone());
                        return Err(CoreError::ServiceUnavailable {
                            attempts: max,
                            message,
                        });
                    }
                    let delay = self.config.backoff.next_delay(attempt);
                    debug!(attempt, ?delay, error = %err, "capture service start failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Stop the capture service. Best-effort: the state becomes `Idle`
    /// whatever the platform answers.
    pub async fn stop(&self, scope: &Scope) {
        if let Err(err) = self.bounded(self.control.stop(scope)).await {
            warn!(error = %err, "capture service stop failed (ignored)");
        }
        self.status.send_replace(ServiceStatus::stopped());
        self.transition(SupervisorState::Idle);
    }

    /// Manual restart: `Running → Starting → Running`.
    pub async fn restart(&self, scope: &Scope) -> Result<(), CoreError> {
        debug!(from = %self.current_state(), "restarting capture service");
        self.start(scope).await
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn current_state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<ServiceStatus> {
        self.status.subscribe()
    }

    pub fn terminal_failure(&self) -> watch::Receiver<Option<TerminalFailure>> {
        self.failure.subscribe()
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        let timeout = self.config.timeout;
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| CoreError::TransientNetwork {
                message: format!("control call timed out after {}s", timeout.as_secs()),
            })?
    }

    fn transition(&self, next: SupervisorState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                warn!(from = %current, to = %next, "illegal supervisor transition ignored");
                return false;
            }
            debug!(from = %current, to = %next, "supervisor state");
            *current = next;
            true
        });
    }

    fn fail(&self, kind: FailureKind, message: String) {
        self.transition(SupervisorState::Failed);
        let failure = TerminalFailure { kind, message };
        self.failure.send_if_modified(|current| {
            if current.as_ref() == Some(&failure) {
                return false;
            }
            *current = Some(failure);
            true
        });
    }

    fn clear_failure(&self) {
        self.failure.send_if_modified(|current| current.take().is_some());
    }
}
