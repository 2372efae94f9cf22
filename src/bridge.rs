//! Lifecycle controller – attaches the bridge to a running server.
//!
//! ## Wiring
//!
//! | Host event         | Effect                                                    |
//! |--------------------|-----------------------------------------------------------|
//! | server started     | build [`TransportClient`], connect, register [`TickDriver`] |
//! | every tick         | [`TickDriver::on_tick`] – snapshot every `tick_period`     |
//! | inbound text frame | [`PlanApplier`] – parse, queue tasks on the executor       |
//! | server stopping    | close the channel and join the transport thread           |
//!
//! One [`AiBridge`] holds at most one connection and one tick counter. It is
//! created explicitly and handed to the host through [`AiBridge::install`].
//!
//! [`TickDispatcher`](crate::host::TickDispatcher) offers no way to remove a
//! callback, so stopping detaches the driver through a shared flag instead.
//! A detached driver returns immediately on every later tick.

use crate::apply::PlanApplier;
use crate::config::{BridgeConfig, ConfigError};
use crate::host::{Server, ServerLifecycle};
use crate::service::TickDriver;
use crate::transport::{TransportClient, TransportError};
use crate::types::{BridgeStats, BridgeStatsSnapshot, ConnectionState};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("bridge is already attached to a running server")]
    AlreadyStarted,
}

/// Everything one server start creates.
struct Attachment {
    client: TransportClient,
    detached: Arc<AtomicBool>,
}

struct Inner {
    config: BridgeConfig,
    stats: Arc<BridgeStats>,
    attachment: Mutex<Option<Attachment>>,
}

/// The bridge between one server process and the AI service.
#[derive(Clone)]
pub struct AiBridge {
    inner: Arc<Inner>,
}

impl AiBridge {
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                stats: Arc::new(BridgeStats::new()),
                attachment: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner
            .attachment
            .lock()
            .as_ref()
            .map(|a| a.client.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Register the started/stopping callbacks with the host.
    ///
    /// Failures inside the callbacks are logged, never propagated into the
    /// host loop.
    pub fn install(&self, lifecycle: &mut dyn ServerLifecycle) {
        let bridge = self.clone();
        lifecycle.on_server_started(Box::new(move |server: &mut dyn Server| {
            if let Err(e) = bridge.on_server_started(server) {
                error!("[aicraft] Failed to attach bridge: {}", e);
            }
        }));

        let bridge = self.clone();
        lifecycle.on_server_stopping(Box::new(move |_server: &mut dyn Server| {
            bridge.on_server_stopping();
        }));
    }

    /// Build the transport, hook the tick driver and start connecting.
    pub fn on_server_started(&self, server: &mut dyn Server) -> Result<(), BridgeError> {
        let mut slot = self.inner.attachment.lock();
        if slot.is_some() {
            return Err(BridgeError::AlreadyStarted);
        }

        let config = &self.inner.config;
        let stats = self.inner.stats.clone();

        let applier = Arc::new(PlanApplier::new(server.executor(), stats.clone()));
        let mut client = TransportClient::from_config(config, applier).with_stats(stats.clone());

        info!(
            "[aicraft] Connecting to {} (snapshot every {} ticks)",
            config.endpoint, config.tick_period
        );
        client.connect()?;

        let detached = Arc::new(AtomicBool::new(false));
        let mut driver = TickDriver::new(client.handle(), config.tick_period, stats);
        let flag = detached.clone();
        server
            .tick_dispatcher()
            .register(Box::new(move |server: &dyn Server| {
                if !flag.load(Ordering::Acquire) {
                    driver.on_tick(server);
                }
            }));

        *slot = Some(Attachment { client, detached });
        Ok(())
    }

    /// Detach the tick driver, close the channel and wait (bounded) for the
    /// transport thread. Best effort.
    pub fn on_server_stopping(&self) {
        let attachment = self.inner.attachment.lock().take();
        match attachment {
            Some(Attachment { mut client, detached }) => {
                info!("[aicraft] Server stopping – closing AI channel");
                detached.store(true, Ordering::Release);
                client.shutdown();
            }
            None => warn!("[aicraft] Server stopping but the bridge was never attached"),
        }
    }
}
