//! Connection orchestrator
//!
//! Drives the connect/disconnect sequence end to end as one cancellable task
//! per request, emitting an ordered progress stream that terminates in exactly
//! one `Validated` or `Failed` event. Profile mutation is funneled through the
//! sequential steps here; a new request cancels the in-flight task and awaits
//! its cleanup before touching shared profiles.

use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::backend::{BackendStatus, DisconnectHint, TunnelBackend};
use super::config::{ConfigBuilder, WireGuardExchange};
use super::failover::{FailoverController, RecoveryAction};
use super::node_selector::select_endpoint;
use super::policy::{RoutingPolicy, UserPolicy, on_demand_rules};
use super::protocol::{BackendFamily, ProtocolPort};
use super::protocol_policy::ProtocolPolicy;
use super::validator::{ConnectivityProbe, validate_connection};
use super::VpnError;
use crate::credentials::CredentialStore;
use crate::files::FileStore;
use crate::locations::{EndpointDirectory, Location, LocationId, SelectedEndpoint};
use crate::notification::NotificationSink;

/// Backend status poll cadence.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long to wait for a stopped profile to settle into disconnected.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE_POLL: Duration = Duration::from_millis(500);

/// Config building races against this; exceeding it fails the attempt.
const BUILD_TIMEOUT: Duration = Duration::from_secs(15);

const PROGRESS_BUFFER: usize = 256;

/// Stream-tunnel handshakes (especially wrapped ones) need longer than the
/// native-protocol families.
fn max_connect_timeout(family: BackendFamily) -> Duration {
    match family {
        BackendFamily::Stream => Duration::from_secs(30),
        BackendFamily::WireGuard | BackendFamily::IkeV2 => Duration::from_secs(20),
    }
}

/// Where the connect sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    DisconnectingOthers,
    PreparingTarget,
    BuildingConfig,
    ApplyingConfig,
    Starting,
    AwaitingStatus,
    Validating,
    Validated,
    Failed,
}

/// Attempt-scoped intent, immutable for the lifetime of the request.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub location: LocationId,
    pub user_policy: UserPolicy,
    /// One-shot protocol override (reconnect-to-another-node flows).
    pub force_protocol: Option<ProtocolPort>,
    /// Marks protocol-failover/-change retries so the per-network preferred
    /// protocol does not override the rotation.
    pub is_protocol_switch: bool,
    /// Debug override: always connect to this node when present.
    pub forced_node: Option<String>,
}

impl ConnectRequest {
    pub fn new(location: LocationId, user_policy: UserPolicy) -> Self {
        Self {
            location,
            user_policy,
            force_protocol: None,
            is_protocol_switch: false,
            forced_node: None,
        }
    }
}

/// Progress reported to the caller. Consumers may see any number of `Update`
/// and `BackendStatus` events but exactly one terminal `Validated`/`Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Update(String),
    BackendStatus(BackendStatus),
    Validating,
    Validated(String),
    Failed(VpnError),
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Validated(_) | ProgressEvent::Failed(_))
    }
}

/// Finite, ordered, non-restartable event stream for one request.
pub struct ProgressStream {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressStream {
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Drain until the terminal event (or the stream closes).
    pub async fn wait_terminal(&mut self) -> Option<ProgressEvent> {
        while let Some(event) = self.rx.recv().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    }
}

#[derive(Clone)]
struct Progress {
    tx: mpsc::Sender<ProgressEvent>,
}

impl Progress {
    async fn update(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        let _ = self.tx.send(ProgressEvent::Update(message)).await;
    }

    async fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event).await;
    }
}

struct ActiveTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Per-attempt recovery adjustments carried between driver-loop iterations.
struct AttemptPlan {
    pinned_node: Option<String>,
    forced_protocol: Option<ProtocolPort>,
    refresh_credentials: bool,
    is_retry: bool,
    failed_nodes: HashSet<String>,
}

struct AttemptOutcome {
    address: String,
    protocol_port: ProtocolPort,
}

struct AttemptError {
    error: VpnError,
    hostname: Option<String>,
    protocol_port: Option<ProtocolPort>,
}

impl AttemptError {
    fn bare(error: VpnError) -> Self {
        Self {
            error,
            hostname: None,
            protocol_port: None,
        }
    }
}

/// The connection orchestrator. Owns one injected backend adapter per
/// protocol family plus the external collaborators; holds no global state.
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
    active: tokio::sync::Mutex<Option<ActiveTask>>,
}

struct OrchestratorInner {
    backends: Vec<Arc<dyn TunnelBackend>>,
    directory: Arc<dyn EndpointDirectory>,
    builder: ConfigBuilder,
    probe: Arc<dyn ConnectivityProbe>,
    notifier: Arc<dyn NotificationSink>,
    protocol_policy: Mutex<ProtocolPolicy>,
    state: Mutex<ConnectionState>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backends: Vec<Arc<dyn TunnelBackend>>,
        directory: Arc<dyn EndpointDirectory>,
        credentials: Arc<dyn CredentialStore>,
        files: Arc<dyn FileStore>,
        wg_exchange: Arc<dyn WireGuardExchange>,
        probe: Arc<dyn ConnectivityProbe>,
        notifier: Arc<dyn NotificationSink>,
        protocol_policy: ProtocolPolicy,
    ) -> Self {
        let builder = ConfigBuilder::new(
            Arc::clone(&directory),
            credentials,
            files,
            wg_exchange,
        );
        Self {
            inner: Arc::new(OrchestratorInner {
                backends,
                directory,
                builder,
                probe,
                notifier,
                protocol_policy: Mutex::new(protocol_policy),
                state: Mutex::new(ConnectionState::Idle),
            }),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Start a connect request. Any in-flight request is cancelled and fully
    /// cleaned up (profile disabled) before the new task begins.
    pub async fn connect(&self, request: ConnectRequest) -> ProgressStream {
        self.cancel().await;
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.run_connect(request, Progress { tx }, cancel_rx).await;
        });
        *self.active.lock().await = Some(ActiveTask {
            cancel: cancel_tx,
            handle,
        });
        ProgressStream { rx }
    }

    /// Disconnect every configured profile.
    pub async fn disconnect(&self) -> ProgressStream {
        self.cancel().await;
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.run_disconnect(Progress { tx }, cancel_rx).await;
        });
        *self.active.lock().await = Some(ActiveTask {
            cancel: cancel_tx,
            handle,
        });
        ProgressStream { rx }
    }

    /// Cancel the in-flight task, if any, and await its cleanup.
    pub async fn cancel(&self) {
        let task = self.active.lock().await.take();
        if let Some(task) = task {
            let _ = task.cancel.send(true);
            let _ = task.handle.await;
        }
    }
}

impl OrchestratorInner {
    fn set_state(&self, state: ConnectionState) {
        info!("Connection state: {:?}", state);
        *self.state.lock() = state;
    }

    fn backend_for(&self, family: BackendFamily) -> Option<Arc<dyn TunnelBackend>> {
        self.backends
            .iter()
            .find(|b| b.family() == family)
            .cloned()
    }

    fn other_backends(&self, family: BackendFamily) -> Vec<Arc<dyn TunnelBackend>> {
        self.backends
            .iter()
            .filter(|b| b.family() != family)
            .cloned()
            .collect()
    }

    async fn run_connect(
        self: &Arc<Self>,
        request: ConnectRequest,
        progress: Progress,
        mut cancel: watch::Receiver<bool>,
    ) {
        self.notifier.connecting();
        let mut failover = FailoverController::new();
        let mut failed_nodes: HashSet<String> = HashSet::new();
        let mut plan = AttemptPlan {
            pinned_node: None,
            forced_protocol: request.force_protocol.clone(),
            refresh_credentials: false,
            is_retry: request.is_protocol_switch,
            failed_nodes: HashSet::new(),
        };

        loop {
            plan.failed_nodes = failed_nodes.clone();
            match self.run_attempt(&request, &plan, &progress, &mut cancel).await {
                Ok(outcome) => {
                    self.protocol_policy
                        .lock()
                        .on_validated(outcome.protocol_port.clone());
                    self.set_state(ConnectionState::Validated);
                    progress
                        .send(ProgressEvent::Validated(outcome.address.clone()))
                        .await;
                    self.notifier.connected(&outcome.address);
                    return;
                }
                Err(AttemptError {
                    error,
                    hostname,
                    protocol_port,
                }) => {
                    if error == VpnError::Cancelled {
                        self.set_state(ConnectionState::Failed);
                        progress.send(ProgressEvent::Failed(VpnError::Cancelled)).await;
                        self.notifier.disconnected();
                        return;
                    }
                    match failover.next_action(&error) {
                        RecoveryAction::Fail => {
                            self.set_state(ConnectionState::Failed);
                            progress.send(ProgressEvent::Failed(error)).await;
                            self.notifier.disconnected();
                            return;
                        }
                        RecoveryAction::RefreshCredentials => {
                            progress
                                .update("Credentials rejected, refreshing and retrying")
                                .await;
                            plan.refresh_credentials = true;
                            plan.pinned_node = hostname;
                            plan.forced_protocol = protocol_port;
                            plan.is_retry = true;
                        }
                        RecoveryAction::SwitchNode => {
                            progress
                                .update("Timed out, retrying with another node in this location")
                                .await;
                            if let Some(hostname) = hostname {
                                failed_nodes.insert(hostname);
                            }
                            plan.refresh_credentials = false;
                            plan.pinned_node = None;
                            plan.forced_protocol = protocol_port;
                            plan.is_retry = true;
                        }
                        RecoveryAction::AdvanceProtocol => {
                            self.protocol_policy.lock().on_failure();
                            progress.update("Advancing to the next protocol").await;
                            plan.refresh_credentials = false;
                            plan.pinned_node = None;
                            plan.forced_protocol = None;
                            plan.is_retry = true;
                        }
                    }
                }
            }
        }
    }

    /// One pass through the state machine. Every exit that is not validated
    /// leaves the target profile disabled.
    async fn run_attempt(
        self: &Arc<Self>,
        request: &ConnectRequest,
        plan: &AttemptPlan,
        progress: &Progress,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<AttemptOutcome, AttemptError> {
        let location = self
            .directory
            .location(&request.location)
            .await
            .ok_or_else(|| {
                AttemptError::bare(VpnError::LocationNotFound(request.location.to_string()))
            })?;

        let mut protocol_port = match &plan.forced_protocol {
            Some(pp) => pp.clone(),
            None => self.protocol_policy.lock().next(plan.is_retry),
        };
        // Imported profiles dictate their own protocol and port.
        if let Location::Custom(custom) = &location {
            protocol_port = ProtocolPort::new(custom.protocol, &custom.port);
        }
        let family = protocol_port.protocol.family();

        if plan.refresh_credentials {
            progress.update("Fetching fresh credentials").await;
            let _ = self.directory.refresh_account_credentials(family).await;
        }

        let forced_node = plan
            .pinned_node
            .as_deref()
            .or(request.forced_node.as_deref());
        let mut endpoint = select_endpoint(&location, forced_node, &plan.failed_nodes)
            .map_err(AttemptError::bare)?;
        if plan.refresh_credentials {
            if let Location::StaticIp(static_ip) = &location {
                if let Some(fresh) = self.directory.static_ip_credentials(static_ip.id).await {
                    // New snapshot; endpoints are never patched in place.
                    endpoint = SelectedEndpoint {
                        static_ip_credentials: Some(fresh),
                        ..endpoint
                    };
                }
            }
        }
        self.notifier.endpoint_changed(&endpoint);

        let attempt_hostname = endpoint.hostname.clone();
        let attempt_protocol = protocol_port.clone();
        let fail = move |error: VpnError| AttemptError {
            error,
            hostname: Some(attempt_hostname.clone()),
            protocol_port: Some(attempt_protocol.clone()),
        };

        progress
            .update(format!(
                "Attempting connection: [{} {} via {}]",
                request.location, endpoint.hostname, protocol_port
            ))
            .await;

        // Stop and neutralize every other family so only one profile can
        // ever hold connecting/connected state.
        self.set_state(ConnectionState::DisconnectingOthers);
        for backend in self.other_backends(family) {
            if *cancel.borrow() {
                return Err(fail(VpnError::Cancelled));
            }
            if let Err(e) = backend.reload().await {
                warn!("Reload of {} profile failed: {}", backend.family(), e);
            }
            let status = backend.status().await;
            progress
                .update(format!(
                    "Existing profile: [{} enabled: {} status: {}]",
                    backend.family(),
                    backend.is_enabled().await,
                    status
                ))
                .await;
            if status.is_active() {
                progress
                    .update(format!("Stopping active {} profile", backend.family()))
                    .await;
                backend.stop().await;
                self.wait_for_disconnect(&backend, cancel).await;
            }
            backend.set_on_demand_rules(Vec::new()).await;
            backend.set_enabled(false).await;
            if let Err(e) = backend.save().await {
                return Err(fail(VpnError::ConfigBuild(format!(
                    "failed to persist {} profile: {}",
                    backend.family(),
                    e
                ))));
            }
        }

        // Clean slate on the target before reconfiguration.
        self.set_state(ConnectionState::PreparingTarget);
        let Some(target) = self.backend_for(family) else {
            return Err(fail(VpnError::ConfigBuild(format!(
                "no backend adapter registered for {}",
                family
            ))));
        };
        if *cancel.borrow() {
            self.disable_profile(&target).await;
            return Err(fail(VpnError::Cancelled));
        }
        if let Err(e) = target.reload().await {
            warn!("Reload of target profile failed: {}", e);
        }
        if target.status().await.is_active() {
            progress
                .update(format!("Stopping previous {} connection", family))
                .await;
            target.stop().await;
            self.wait_for_disconnect(&target, cancel).await;
            if let Err(e) = target.reload().await {
                warn!("Reload of target profile failed: {}", e);
            }
        }
        self.disable_profile(&target).await;

        // Build the configuration, racing the build timeout.
        self.set_state(ConnectionState::BuildingConfig);
        progress.update("Building configuration").await;
        let config = tokio::select! {
            result = self.builder.build(&endpoint, &protocol_port, &request.user_policy) => {
                result.map_err(|e| fail(e))?
            }
            _ = tokio::time::sleep(BUILD_TIMEOUT) => {
                return Err(fail(VpnError::ConfigBuild(
                    "configuration build timed out".to_string(),
                )));
            }
            _ = cancel.changed() => {
                self.disable_profile(&target).await;
                return Err(fail(VpnError::Cancelled));
            }
        };
        if config.remote_address().is_none() {
            // Never hand the backend a config that cannot name its remote.
            return Err(fail(VpnError::ConfigBuild(
                "built configuration has no remote address".to_string(),
            )));
        }

        // Translate into the profile and apply the user policy.
        self.set_state(ConnectionState::ApplyingConfig);
        progress.update("Applying profile and user policy").await;
        let routing = RoutingPolicy::resolve(&request.user_policy);
        if let Err(e) = target.apply(&config, routing).await {
            self.disable_profile(&target).await;
            return Err(fail(VpnError::ConfigBuild(format!(
                "failed to apply configuration: {}",
                e
            ))));
        }
        target
            .set_on_demand_rules(on_demand_rules(&request.user_policy))
            .await;
        target.set_enabled(true).await;

        self.set_state(ConnectionState::Starting);
        progress.update("Saving profile").await;
        if let Err(e) = target.save().await {
            self.disable_profile(&target).await;
            return Err(fail(VpnError::ConfigBuild(format!(
                "failed to persist profile: {}",
                e
            ))));
        }
        if *cancel.borrow() {
            self.disable_profile(&target).await;
            return Err(fail(VpnError::Cancelled));
        }
        progress.update("Starting tunnel").await;
        if let Err(e) = target.start().await {
            self.disable_profile(&target).await;
            return Err(fail(VpnError::ConfigBuild(format!(
                "failed to start tunnel: {}",
                e
            ))));
        }

        // Poll until connected, failing on the protocol-specific deadline.
        self.set_state(ConnectionState::AwaitingStatus);
        progress.update("Awaiting tunnel status").await;
        let deadline = max_connect_timeout(family);
        let started = Instant::now();
        let mut last_status = None;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.changed() => {}
            }
            if *cancel.borrow() {
                self.disable_profile(&target).await;
                return Err(fail(VpnError::Cancelled));
            }
            let status = target.status().await;
            if last_status != Some(status) {
                progress.send(ProgressEvent::BackendStatus(status)).await;
                last_status = Some(status);
            }
            if status == BackendStatus::Connected {
                break;
            }
            if status == BackendStatus::Disconnected {
                // The backend already gave up; surface credential rejections
                // without burning the rest of the window.
                if target.last_disconnect_error().await
                    == Some(DisconnectHint::CredentialsRejected)
                {
                    self.disable_profile(&target).await;
                    return Err(fail(VpnError::AuthFailure));
                }
            }
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                progress
                    .update(format!(
                        "Failed to connect: timed out after {}s",
                        deadline.as_secs()
                    ))
                    .await;
                self.disable_profile(&target).await;
                let error = match target.last_disconnect_error().await {
                    Some(DisconnectHint::CredentialsRejected) => VpnError::AuthFailure,
                    _ => VpnError::Timeout,
                };
                return Err(fail(error));
            }
            progress
                .update(format!(
                    "Waiting for tunnel, {}s elapsed",
                    elapsed.as_secs()
                ))
                .await;
        }

        // The tunnel is up; prove it can reach the outside world.
        self.set_state(ConnectionState::Validating);
        progress.send(ProgressEvent::Validating).await;
        let expected_address = match &location {
            Location::StaticIp(static_ip) => Some(static_ip.static_address.clone()),
            _ => None,
        };
        match validate_connection(self.probe.as_ref(), expected_address.as_deref(), cancel).await
        {
            Ok(validated) => {
                if let Some(expected) = &validated.pinned_mismatch {
                    progress
                        .update(format!(
                            "Observed address {} differs from dedicated address {}",
                            validated.address, expected
                        ))
                        .await;
                }
                progress
                    .update(format!(
                        "Connectivity test successful, address {}",
                        validated.address
                    ))
                    .await;
                Ok(AttemptOutcome {
                    address: validated.address,
                    protocol_port,
                })
            }
            Err(VpnError::Cancelled) => {
                self.disable_profile(&target).await;
                Err(fail(VpnError::Cancelled))
            }
            Err(error) => {
                self.disable_profile(&target).await;
                for backend in &self.backends {
                    if let Err(e) = backend.reload().await {
                        warn!("Reload of {} profile failed: {}", backend.family(), e);
                    }
                }
                Err(fail(error))
            }
        }
    }

    async fn run_disconnect(
        self: &Arc<Self>,
        progress: Progress,
        mut cancel: watch::Receiver<bool>,
    ) {
        self.notifier.disconnecting();
        progress.update("Disconnecting all tunnel profiles").await;
        for backend in &self.backends {
            if *cancel.borrow() {
                break;
            }
            if let Err(e) = backend.reload().await {
                warn!("Reload of {} profile failed: {}", backend.family(), e);
            }
            let status = backend.status().await;
            progress
                .update(format!("Profile [{}] status: {}", backend.family(), status))
                .await;
            backend.set_on_demand_rules(Vec::new()).await;
            backend.set_enabled(false).await;
            if let Err(e) = backend.save().await {
                warn!("Failed to persist {} profile: {}", backend.family(), e);
            }
            if status.is_active() || status == BackendStatus::Disconnecting {
                backend.stop().await;
                self.wait_for_disconnect(backend, &mut cancel).await;
            }
        }
        self.set_state(ConnectionState::Idle);
        progress.update("Disconnect complete").await;
        self.notifier.disconnected();
    }

    /// Best-effort bounded wait for a stopped profile to report disconnected.
    async fn wait_for_disconnect(
        &self,
        backend: &Arc<dyn TunnelBackend>,
        cancel: &mut watch::Receiver<bool>,
    ) {
        let start = Instant::now();
        while backend.status().await != BackendStatus::Disconnected {
            if start.elapsed() > SETTLE_TIMEOUT || *cancel.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(SETTLE_POLL) => {}
                _ = cancel.changed() => {}
            }
        }
    }

    /// Disable a profile: enabled off, on-demand rules cleared, persisted.
    /// No-op (and no save) when the profile is already fully disabled.
    async fn disable_profile(&self, backend: &Arc<dyn TunnelBackend>) {
        if let Err(e) = backend.reload().await {
            warn!("Reload before disable failed: {}", e);
        }
        if backend.is_enabled().await || backend.on_demand_active().await {
            backend.set_enabled(false).await;
            backend.set_on_demand_rules(Vec::new()).await;
            if let Err(e) = backend.save().await {
                warn!("Failed to persist disabled {} profile: {}", backend.family(), e);
            }
        }
    }
}
