//! Console engine.
//!
//! Owns the connection session, both local stores and the two poll
//! schedulers, and is the only writer to any of them. Every operation is a
//! non-blocking request/response call; local state mutates synchronously
//! once a response arrives, so ordering is the only concurrency concern and
//! each commit is either a wholesale window replacement or a single-key
//! update.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::client::DeviceClient;
use crate::coalesce::AddressRange;
use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};
use crate::events::{EngineEvent, EventBus, Severity};
use crate::poll::{PollKind, PollScheduler, PollTask, MIN_POLL_INTERVAL_SECS};
use crate::session::{validate_ipv4, ConnState, ConnectionSession, ConnectionSnapshot, Endpoint};
use crate::store::{CoilStateStore, RegisterSnapshot, RegisterWindow};

/// Coil auto-poll cadence, fixed and independent of the user-configured
/// register cadence.
pub const COIL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Session & polling synchronization engine, one per console instance.
pub struct ConsoleEngine {
    client: Arc<dyn DeviceClient>,
    config: ConsoleConfig,
    session: RwLock<ConnectionSession>,
    coils: CoilStateStore,
    registers: RegisterSnapshot,
    /// Last register window requested by the user; reused by the auto-read.
    register_request: RwLock<AddressRange>,
    register_interval_secs: AtomicU64,
    register_poll: PollScheduler,
    coil_poll: PollScheduler,
    events: EventBus,
}

impl ConsoleEngine {
    pub fn new(client: Arc<dyn DeviceClient>, config: ConsoleConfig) -> Arc<Self> {
        let register_request = config.default_register_window();
        let register_interval_secs = config
            .poll
            .register_interval_secs
            .max(MIN_POLL_INTERVAL_SECS);

        Arc::new(Self {
            client,
            config,
            session: RwLock::new(ConnectionSession::new()),
            coils: CoilStateStore::new(),
            registers: RegisterSnapshot::new(),
            register_request: RwLock::new(register_request),
            register_interval_secs: AtomicU64::new(register_interval_secs),
            register_poll: PollScheduler::new(PollKind::Registers),
            coil_poll: PollScheduler::new(PollKind::Coils),
            events: EventBus::default(),
        })
    }

    /// Subscribe to engine change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Connect to the device through the bridge. Rejects malformed IPv4
    /// syntax before any remote call; on success the coil auto-poll starts
    /// at its fixed cadence.
    pub async fn connect(
        self: &Arc<Self>,
        ip: &str,
        port: u16,
        unit_id: u8,
        timeout_ms: u64,
    ) -> Result<ConnectionSnapshot> {
        validate_ipv4(ip)?;

        // A connect while connected replaces the previous session.
        self.stop_polling().await;

        let endpoint = Endpoint {
            ip: ip.to_string(),
            port,
            unit_id,
            timeout_ms,
        };
        self.session.write().await.begin_connect(endpoint.clone());
        self.publish_connection().await;
        self.events.emit(EngineEvent::Loading(true));

        let outcome = self.client.connect(&endpoint).await;
        self.events.emit(EngineEvent::Loading(false));

        match outcome {
            Ok(()) => {
                self.session.write().await.mark_connected();
                self.publish_connection().await;
                self.events
                    .toast(format!("Connected to {}:{}", ip, port), Severity::Success);
                info!("connected to device {}:{} (unit {})", ip, port, unit_id);

                self.coil_poll
                    .start(COIL_POLL_INTERVAL, self.coil_task())
                    .await;
                Ok(self.connection_snapshot().await)
            },
            Err(err) => {
                self.session.write().await.reset();
                self.publish_connection().await;
                self.events
                    .toast(format!("Connection failed: {}", err), Severity::Error);
                Err(err.into())
            },
        }
    }

    /// Disconnect from the device. Idempotent; the local session always ends
    /// `Disconnected` even when the remote acknowledgment fails, so the
    /// console can never get stuck showing a dead connection.
    pub async fn disconnect(&self) -> Result<ConnectionSnapshot> {
        if self.session.read().await.state() == ConnState::Disconnected {
            return Ok(self.connection_snapshot().await);
        }

        self.stop_polling().await;
        let outcome = self.client.disconnect().await;

        self.session.write().await.reset();
        self.publish_connection().await;

        match outcome {
            Ok(()) => self.events.toast("Disconnected from device", Severity::Success),
            Err(err) => self.events.toast(
                format!("Remote disconnect failed: {}", err),
                Severity::Warning,
            ),
        }
        Ok(self.connection_snapshot().await)
    }

    /// Ask the bridge for its view of connectivity and reconcile the local
    /// session: anything other than "connected" on the remote side drops a
    /// locally connected session and stops both polls.
    pub async fn check_status(&self) -> ConnectionSnapshot {
        let remote_connected = match self.client.status().await {
            Ok(status) => status.connected,
            Err(err) => {
                debug!("status check failed: {}", err);
                false
            },
        };

        if !remote_connected && self.session.read().await.state() != ConnState::Disconnected {
            warn!("remote side no longer reports the session as connected");
            self.stop_polling().await;
            self.session.write().await.reset();
            self.publish_connection().await;
            self.events.toast(
                "Device reports the session is no longer connected",
                Severity::Warning,
            );
        }

        self.connection_snapshot().await
    }

    // ========================================================================
    // Registers
    // ========================================================================

    /// Read a register window, replacing the previous one wholesale.
    pub async fn read_registers(&self, start: u16, count: u16) -> Result<RegisterWindow> {
        self.read_registers_inner(start, count, false).await
    }

    async fn read_registers_inner(
        &self,
        start: u16,
        count: u16,
        auto: bool,
    ) -> Result<RegisterWindow> {
        validate_window(start, count)?;
        self.require_connected().await?;

        if !auto {
            self.events.emit(EngineEvent::Loading(true));
        }

        // Guard against acting on a stale local session.
        let snapshot = self.check_status().await;
        if snapshot.state != ConnState::Connected {
            if !auto {
                self.events.emit(EngineEvent::Loading(false));
            }
            return Err(ConsoleError::stale("device not connected"));
        }

        *self.register_request.write().await = AddressRange::new(start, count);
        let result = self.client.read_registers(start, count).await;

        if !auto {
            self.events.emit(EngineEvent::Loading(false));
        }

        match result {
            Ok(values) => {
                if !self.session.read().await.is_connected() {
                    // Session dropped while the call was outstanding.
                    debug!("register window discarded: session disconnected mid-flight");
                    return Err(ConsoleError::NotConnected);
                }
                let window = RegisterWindow::new(start, values);
                self.registers.replace(window.clone()).await;
                self.session.write().await.mark_read_now();
                self.events.emit(EngineEvent::Registers(window.clone()));
                Ok(window)
            },
            Err(err) => {
                self.events
                    .toast(format!("Register read failed: {}", err), Severity::Error);
                Err(err.into())
            },
        }
    }

    /// Write a single holding register.
    pub async fn write_register(&self, address: u16, value: u16) -> Result<()> {
        self.require_connected().await?;

        self.events.emit(EngineEvent::Loading(true));
        let result = self.client.write_register(address, value).await;
        self.events.emit(EngineEvent::Loading(false));

        match result {
            Ok(()) => {
                self.events.toast(
                    format!("Value {} written to register {}", value, address),
                    Severity::Success,
                );
                Ok(())
            },
            Err(err) => {
                self.events
                    .toast(format!("Register write failed: {}", err), Severity::Error);
                Err(err.into())
            },
        }
    }

    // ========================================================================
    // Coils
    // ========================================================================

    /// Replace the tracked coil set with `start .. start + count`, each
    /// state initialized from a remote read.
    pub async fn load_coil_range(&self, start: u16, count: u16) -> Result<BTreeMap<u16, bool>> {
        validate_window(start, count)?;
        self.require_connected().await?;

        self.events.emit(EngineEvent::Loading(true));
        let result = self.client.read_coils(start, count).await;
        self.events.emit(EngineEvent::Loading(false));

        match result {
            Ok(values) => {
                if !self.session.read().await.is_connected() {
                    debug!("coil range discarded: session disconnected mid-flight");
                    return Err(ConsoleError::NotConnected);
                }
                self.coils.replace_range(start, &values).await;
                self.session.write().await.mark_read_now();
                let snapshot = self.coils.snapshot().await;
                self.events.emit(EngineEvent::Coils(snapshot.clone()));
                self.events.toast(
                    format!("Loaded {} coils from address {}", values.len(), start),
                    Severity::Success,
                );
                Ok(snapshot)
            },
            Err(err) => {
                self.events
                    .toast(format!("Coil read failed: {}", err), Severity::Error);
                Err(err.into())
            },
        }
    }

    /// Refresh every tracked coil with a single coalesced read. Addresses
    /// fetched only because they fall inside the covering window are
    /// discarded; the tracked set only grows through `load_coil_range`.
    pub async fn refresh_coils(&self) -> Result<BTreeMap<u16, bool>> {
        self.refresh_coils_inner(false).await
    }

    async fn refresh_coils_inner(&self, auto: bool) -> Result<BTreeMap<u16, bool>> {
        self.require_connected().await?;

        if !auto {
            self.events.emit(EngineEvent::Loading(true));
        }

        let was_empty = self.coils.is_empty().await;
        let window = self
            .coils
            .request_window(self.config.default_coil_range())
            .await;
        let result = self.client.read_coils(window.start, window.count).await;

        if !auto {
            self.events.emit(EngineEvent::Loading(false));
        }

        match result {
            Ok(values) => {
                if !self.session.read().await.is_connected() {
                    debug!("coil window discarded: session disconnected mid-flight");
                    return Err(ConsoleError::NotConnected);
                }
                if was_empty {
                    // Nothing tracked yet: the default window seeds the set.
                    self.coils.replace_range(window.start, &values).await;
                } else {
                    self.coils.apply_window(window.start, &values).await;
                }
                self.session.write().await.mark_read_now();
                let snapshot = self.coils.snapshot().await;
                self.events.emit(EngineEvent::Coils(snapshot.clone()));
                Ok(snapshot)
            },
            Err(err) => {
                self.events
                    .toast(format!("Coil read failed: {}", err), Severity::Error);
                Err(err.into())
            },
        }
    }

    /// Flip one coil. The local state is committed only after the remote
    /// write acknowledges, so a failed write leaves the store untouched.
    /// Returns the new state.
    pub async fn toggle_coil(&self, address: u16) -> Result<bool> {
        self.require_connected().await?;

        let target = !self.coils.state(address).await;

        self.events.emit(EngineEvent::Loading(true));
        let result = self.client.write_coil(address, target).await;
        self.events.emit(EngineEvent::Loading(false));

        match result {
            Ok(()) => {
                self.coils.commit(address, target).await;
                self.events
                    .emit(EngineEvent::Coils(self.coils.snapshot().await));
                self.events.toast(
                    format!(
                        "Coil {} switched {}",
                        address,
                        if target { "on" } else { "off" }
                    ),
                    Severity::Success,
                );
                Ok(target)
            },
            Err(err) => {
                self.events
                    .toast(format!("Coil write failed: {}", err), Severity::Error);
                Err(err.into())
            },
        }
    }

    // ========================================================================
    // Emergency stop & bulk refresh
    // ========================================================================

    /// Emergency stop. Both poll tasks are disabled on success; on failure
    /// they deliberately keep running so the operator can retry without
    /// losing the scheduling state.
    pub async fn emergency_stop(&self) -> Result<()> {
        self.require_connected().await?;

        match self.client.emergency_stop().await {
            Ok(()) => {
                self.stop_polling().await;
                self.events.toast("Emergency stop executed", Severity::Success);
                Ok(())
            },
            Err(err) => {
                self.events
                    .toast(format!("Emergency stop failed: {}", err), Severity::Error);
                Err(err.into())
            },
        }
    }

    /// Status check plus a re-read of both stores, mirroring a renderer's
    /// "refresh" action. Read failures are already toasted; they do not
    /// abort the remaining refresh steps.
    pub async fn refresh_all(&self) -> ConnectionSnapshot {
        let snapshot = self.check_status().await;
        if snapshot.state == ConnState::Connected {
            if let Err(err) = self.refresh_coils().await {
                debug!("coil refresh failed during refresh_all: {}", err);
            }
            let request = *self.register_request.read().await;
            if let Err(err) = self.read_registers(request.start, request.count).await {
                debug!("register read failed during refresh_all: {}", err);
            }
        }
        snapshot
    }

    // ========================================================================
    // Register auto-read control
    // ========================================================================

    /// Start the periodic register read at the configured cadence.
    pub async fn enable_auto_read(self: &Arc<Self>) -> Result<()> {
        self.require_connected().await?;
        let interval = Duration::from_secs(self.register_interval_secs.load(Ordering::Relaxed));
        self.register_poll.start(interval, self.register_task()).await;
        self.events
            .toast("Automatic register read started", Severity::Success);
        Ok(())
    }

    /// Stop the periodic register read. Safe when never started.
    pub async fn disable_auto_read(&self) {
        self.register_poll.stop().await;
    }

    pub fn auto_read_enabled(&self) -> bool {
        self.register_poll.is_enabled()
    }

    /// Change the register cadence, clamped to a 1 s floor; restarts the
    /// scheduler when it is running.
    pub async fn set_register_interval(self: &Arc<Self>, secs: u64) {
        let secs = secs.max(MIN_POLL_INTERVAL_SECS);
        self.register_interval_secs.store(secs, Ordering::Relaxed);
        self.register_poll
            .set_interval(secs, self.register_task())
            .await;
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub async fn connection_snapshot(&self) -> ConnectionSnapshot {
        self.session.read().await.snapshot()
    }

    pub async fn coil_states(&self) -> BTreeMap<u16, bool> {
        self.coils.snapshot().await
    }

    pub async fn register_window(&self) -> Option<RegisterWindow> {
        self.registers.window().await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn require_connected(&self) -> Result<()> {
        if self.session.read().await.is_connected() {
            Ok(())
        } else {
            Err(ConsoleError::NotConnected)
        }
    }

    async fn stop_polling(&self) {
        self.register_poll.stop().await;
        self.coil_poll.stop().await;
    }

    async fn publish_connection(&self) {
        self.events
            .emit(EngineEvent::Connection(self.connection_snapshot().await));
    }

    fn register_task(self: &Arc<Self>) -> Arc<dyn PollTask> {
        Arc::new(RegisterPollTask {
            engine: Arc::downgrade(self),
        })
    }

    fn coil_task(self: &Arc<Self>) -> Arc<dyn PollTask> {
        Arc::new(CoilPollTask {
            engine: Arc::downgrade(self),
        })
    }
}

/// A read window must be non-empty and must not run past address 65535.
fn validate_window(start: u16, count: u16) -> Result<()> {
    if count < 1 {
        return Err(ConsoleError::invalid("count must be at least 1"));
    }
    if u32::from(start) + u32::from(count) > 65_536 {
        return Err(ConsoleError::invalid(format!(
            "window {}+{} runs past the end of the address space",
            start, count
        )));
    }
    Ok(())
}

/// Register auto-read tick. Re-reads the last user-requested window.
struct RegisterPollTask {
    engine: Weak<ConsoleEngine>,
}

#[async_trait]
impl PollTask for RegisterPollTask {
    async fn is_ready(&self) -> bool {
        match self.engine.upgrade() {
            Some(engine) => engine.session.read().await.is_connected(),
            None => false,
        }
    }

    async fn poll(&self) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        let request = *engine.register_request.read().await;
        if let Err(err) = engine
            .read_registers_inner(request.start, request.count, true)
            .await
        {
            // Poll ticks swallow remote failures; the toast already went out.
            debug!("register auto read failed: {}", err);
        }
    }

    async fn on_auto_disabled(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.events.toast(
                "Automatic register read disabled: device not connected",
                Severity::Warning,
            );
        }
    }
}

/// Coil auto-read tick. Refreshes the tracked set through one coalesced
/// window.
struct CoilPollTask {
    engine: Weak<ConsoleEngine>,
}

#[async_trait]
impl PollTask for CoilPollTask {
    async fn is_ready(&self) -> bool {
        match self.engine.upgrade() {
            Some(engine) => engine.session.read().await.is_connected(),
            None => false,
        }
    }

    async fn poll(&self) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        if let Err(err) = engine.refresh_coils_inner(true).await {
            debug!("coil auto read failed: {}", err);
        }
    }

    async fn on_auto_disabled(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.events.toast(
                "Automatic coil read disabled: device not connected",
                Severity::Warning,
            );
        }
    }
}
