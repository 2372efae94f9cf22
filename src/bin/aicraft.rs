//! aicraft-bridge binary
//!
//! Runs an in-memory server at a fixed tick rate with the AI bridge attached,
//! so the bridge can be exercised against a real AI service without a game
//! engine.
//!
//! ## Configuration (env / TOML via `config` crate, flags via `clap`)
//!
//! | Flag                  | Env                              | Default                  |
//! |-----------------------|----------------------------------|--------------------------|
//! | `--config`            | `AICRAFT_CONFIG`                 | *(none)*                 |
//! | `--endpoint`          | `AICRAFT_ENDPOINT`               | `ws://127.0.0.1:8000/ws` |
//! | `--tick-period`       | `AICRAFT_TICK_PERIOD`            | `40`                     |
//! | `--reconnect-retries` | `AICRAFT_RECONNECT__MAX_RETRIES` | `0`                      |
//! | `--tps`               | `AICRAFT_TPS`                    | `20`                     |
//! | `--players`           | `AICRAFT_PLAYERS`                | `0`                      |

use aicraft_bridge::config::BridgeConfig;
use aicraft_bridge::{AiBridge, SimServer};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "aicraft-bridge", about = "AiCraft world/AI bridge", version)]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "AICRAFT_CONFIG")]
    config: Option<PathBuf>,

    /// AI service WebSocket URL
    #[arg(long, env = "AICRAFT_ENDPOINT")]
    endpoint: Option<String>,

    /// Ticks between two snapshots
    #[arg(long, env = "AICRAFT_TICK_PERIOD")]
    tick_period: Option<u32>,

    /// Reconnect attempts after a lost connection (0 = never)
    #[arg(long, env = "AICRAFT_RECONNECT__MAX_RETRIES")]
    reconnect_retries: Option<u32>,

    /// Simulated server tick rate
    #[arg(long, env = "AICRAFT_TPS", default_value_t = 20)]
    tps: u32,

    /// Simulated connected players
    #[arg(long, env = "AICRAFT_PLAYERS", default_value_t = 0)]
    players: usize,
}

impl Args {
    fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut config =
            BridgeConfig::load(self.config.as_deref()).context("Failed to load bridge config")?;
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(period) = self.tick_period {
            config.tick_period = period;
        }
        if let Some(retries) = self.reconnect_retries {
            config.reconnect.max_retries = retries;
        }
        config.validate().context("Invalid bridge config")?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aicraft_bridge=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = args.bridge_config()?;
    let tps = args.tps.max(1);

    tracing::info!(
        endpoint = %config.endpoint,
        tick_period = config.tick_period,
        reconnect_retries = config.reconnect.max_retries,
        tps,
        players = args.players,
        "Starting aicraft-bridge"
    );

    let mut server = SimServer::new();
    for i in 0..args.players {
        server.players_mut().join(format!("player{}", i + 1));
    }

    let bridge = AiBridge::new(config).context("Failed to create bridge")?;
    bridge.install(&mut server);
    server.start();

    let mut timer = tokio::time::interval(Duration::from_secs(1) / tps);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = timer.tick() => server.tick(),
            _ = &mut shutdown => {
                log::info!("aicraft-bridge shutting down (SIGINT)");
                break;
            }
        }
    }

    server.stop();

    let stats = bridge.stats();
    log::info!(
        "Final stats: {}",
        serde_json::to_string(&stats).context("Failed to serialise stats")?
    );
    log::info!(
        "World: {} ticks, {} block writes, {} non-air blocks",
        server.ticks(),
        server.world().writes(),
        server.world().non_air_blocks()
    );
    Ok(())
}
