//! The hub node: owns the presence core, the transport and background
//! tasks for one process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use troof_crypto::OsRandom;
use troof_presence::{HubServices, PresenceHub, StaticEnrollment};
use troof_store::JsonFileStore;
use troof_types::SystemClock;
use troof_utils::format_duration;
use troof_websocket::{DetectionTimers, FanOut, ServerConfig, WebSocketServer, WsState};

use crate::{HubConfig, HubError, ShutdownController};

/// How long [`HubNode::stop`] waits for background tasks.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HubNode {
    config: HubConfig,
    hub: Arc<PresenceHub>,
    ws_state: Arc<WsState>,
    shutdown: ShutdownController,
    task_handles: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    started_at: Option<Instant>,
}

impl HubNode {
    /// Open the store under `config.data_dir`, restore persisted keys and
    /// rosters, and build the transport state. Nothing is bound yet.
    pub fn new(config: HubConfig) -> Result<Self, HubError> {
        config.validate()?;
        let store = Arc::new(JsonFileStore::open(&config.data_dir)?);
        let fanout = Arc::new(FanOut::new(config.event_buffer));
        let enrollment = StaticEnrollment::new(config.enrollment.iter().cloned());
        if enrollment.is_empty() {
            tracing::warn!("no enrollment codes configured; no sender can register a key");
        }

        let services = HubServices {
            clock: Arc::new(SystemClock),
            random: Arc::new(OsRandom),
            sink: fanout.clone(),
            key_store: store.clone(),
            roster_store: store,
            enrollment: Arc::new(enrollment),
        };
        let hub = Arc::new(PresenceHub::new(config.params.clone(), services)?);

        let ws_state = Arc::new(WsState::new(
            hub.clone(),
            fanout,
            ServerConfig {
                hub_token: config.hub_token.clone(),
                identity_kind: config.identity_kind,
                heartbeat: config.heartbeat(),
            },
        ));

        tracing::info!(
            data_dir = %config.data_dir.display(),
            enrollment_codes = config.enrollment.len(),
            "hub initialised"
        );

        Ok(Self {
            config,
            hub,
            ws_state,
            shutdown: ShutdownController::new(),
            task_handles: Vec::new(),
            local_addr: None,
            started_at: None,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<PresenceHub> {
        &self.hub
    }

    pub fn timers(&self) -> &Arc<DetectionTimers> {
        &self.ws_state.timers
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Address the server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener and spawn the server and the expiry sweep.
    /// Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, HubError> {
        if self.started_at.is_some() {
            return Err(HubError::AlreadyStarted);
        }
        let listener = TcpListener::bind(self.config.socket_addr()).await?;
        let addr = listener.local_addr()?;

        // ── WebSocket server ──────────────────────────────────────────────
        let server = WebSocketServer::new(self.ws_state.clone());
        let server_shutdown = self.shutdown.signalled();
        let ws_handle = tokio::spawn(async move {
            match server.serve(listener, server_shutdown).await {
                Ok(()) => tracing::info!("WebSocket server exited"),
                Err(e) => tracing::error!("WebSocket server error: {e}"),
            }
        });
        self.task_handles.push(ws_handle);

        // ── Expiry sweep ──────────────────────────────────────────────────
        let hub = self.hub.clone();
        let timers = self.ws_state.timers.clone();
        let period = Duration::from_millis(self.config.params.sweep_interval_ms);
        let mut shutdown_rx = self.shutdown.subscribe();
        let sweep_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("sweep task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let report = hub.sweep();
                        timers.cancel_many(&report.expired_challenges);
                    }
                }
            }
        });
        self.task_handles.push(sweep_handle);

        self.local_addr = Some(addr);
        self.started_at = Some(Instant::now());
        tracing::info!(
            %addr,
            challenge_ttl = %format_duration(self.config.params.challenge_ttl_ms),
            detect_window = %format_duration(self.config.params.detect_window_ms),
            auth = self.config.hub_token.is_some(),
            "Troof hub started"
        );
        Ok(addr)
    }

    /// Block until SIGINT, SIGTERM or a programmatic shutdown.
    pub async fn wait_for_shutdown(&self) {
        self.shutdown.wait_for_signal().await;
    }

    /// Stop the hub gracefully.
    ///
    /// 1. Sends the shutdown signal to the server and the sweep task.
    /// 2. Waits for them to finish (with timeout).
    /// 3. Cancels pending detection timers.
    /// 4. Persists keys and rosters.
    pub async fn stop(&mut self) -> Result<(), HubError> {
        tracing::info!("Troof hub stopping");
        self.shutdown.shutdown();

        let handles: Vec<_> = self.task_handles.drain(..).collect();
        let joined = tokio::time::timeout(STOP_TIMEOUT, async {
            for handle in handles {
                let _ = handle.await;
            }
        })
        .await;
        self.ws_state.timers.cancel_all();

        self.hub.persist()?;
        let uptime = self
            .started_at
            .take()
            .map(|t| format_duration(t.elapsed().as_millis() as u64))
            .unwrap_or_else(|| "0ms".into());
        tracing::info!(
            %uptime,
            activity = %self.hub.stats().summary(),
            "state persisted"
        );
        self.local_addr = None;

        if joined.is_err() {
            return Err(HubError::ShutdownTimeout);
        }
        Ok(())
    }
}
