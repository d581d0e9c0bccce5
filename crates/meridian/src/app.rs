//! Main application logic and lifecycle management.
//!
//! This module contains the core `Application` struct that builds the
//! zone partition, spins up one shard per zone on a shared in-process
//! bus, and drives the whole cluster from a single fixed-rate tick loop
//! until a shutdown signal arrives.

use crate::{cli::CliArgs, config::AppConfig, logging::display_banner, signals};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};
use zone_server::handoff::NullNotifier;
use zone_server::messenger::{CrossZoneMessenger, InProcessBus, ZoneEvent};
use zone_server::persistence::InMemoryMirror;
use zone_server::{ZoneId, ZoneOrchestrator, ZoneShard, ZoneState};

/// Main application struct managing the cluster lifecycle.
///
/// The `Application` struct manages the complete lifecycle of the
/// Meridian cluster, including configuration loading, shard
/// initialization, health monitoring, and graceful shutdown handling.
///
/// # Architecture
///
/// * **Configuration Management**: Loads and validates configuration from files and CLI
/// * **Cluster Orchestration**: Builds the zone partition and one shard per zone
/// * **Health Monitoring**: Periodic cluster statistics while running
/// * **Graceful Shutdown**: Handles termination signals and drains shards
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// The running cluster: orchestrator plus one shard per zone
    cluster: ZoneCluster,
}

/// One orchestrator and every zone shard, ticked together in lockstep.
///
/// All shards share one in-process message bus; the orchestrator
/// listens on the control-plane subscription for the heartbeats the
/// shards broadcast once per second.
struct ZoneCluster {
    orchestrator: ZoneOrchestrator,
    shards: Vec<ZoneShard>,
    control: CrossZoneMessenger,
    tick_rate: u32,
    tick: u64,
}

impl ZoneCluster {
    /// Advances every shard one tick, then feeds the heartbeats they
    /// broadcast into the orchestrator's liveness tracking.
    fn tick(&mut self, now_ms: u64) {
        for shard in &mut self.shards {
            shard.tick(now_ms);
        }

        for event in self.control.poll() {
            if let ZoneEvent::ShardStatus {
                zone,
                state,
                player_count,
                ..
            } = event
            {
                self.orchestrator
                    .record_heartbeat(zone, state, player_count, now_ms);
            }
        }

        // Liveness sweep once per second
        if self.tick % self.tick_rate as u64 == 0 {
            self.orchestrator.update(now_ms);
        }
        self.tick += 1;
    }

    fn total_players(&self) -> u32 {
        self.shards.iter().map(|shard| shard.player_count()).sum()
    }
}

impl Application {
    /// Creates a new application instance.
    ///
    /// Loads configuration, applies CLI overrides, validates settings,
    /// and builds the zone partition and shards with proper error
    /// handling.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// A configured `Application` instance ready to run, or an error if
    /// initialization failed.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Build the zone partition, orchestrator, and one shard per zone
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        // Load configuration first (before logging setup)
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some((cols, rows)) = args.grid_dimensions()? {
            config.world.grid_cols = cols;
            config.world.grid_rows = rows;
        }

        if let Some(base_port) = args.base_port {
            config.sharding.base_port = base_port;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        // Validate configuration
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        } else {
            info!("✅ Configuration loaded and validated successfully");
        }

        // Display banner after logging is setup
        display_banner();

        // Build the static partition, then one shard per zone on a
        // shared bus. The orchestrator subscribes on the control-plane
        // channel for shard heartbeats.
        let partition = config.to_partition()?;
        let bus = Arc::new(InProcessBus::new());
        let notifier = Arc::new(NullNotifier);
        let control = CrossZoneMessenger::new(ZoneId::BROADCAST, bus.clone());

        let orchestrator = ZoneOrchestrator::new(
            partition.clone(),
            config.sharding.clone(),
            Arc::new(InMemoryMirror::new()),
        );

        let shared_partition = Arc::new(partition);
        let shards = shared_partition
            .zones()
            .iter()
            .map(|zone| {
                ZoneShard::new(
                    zone.clone(),
                    shared_partition.clone(),
                    &config.sharding,
                    bus.clone(),
                    notifier.clone(),
                )
            })
            .collect::<Vec<_>>();

        info!(
            "🚀 Meridian Zone Cluster v{}",
            env!("CARGO_PKG_VERSION")
        );
        info!(
            "🗺️  Partition: {}x{} zones over {:.0}x{:.0} units",
            config.world.grid_cols,
            config.world.grid_rows,
            config.world.region.max_x - config.world.region.min_x,
            config.world.region.max_z - config.world.region.min_z
        );
        info!("📂 Config: {}", args.config_path.display());

        let tick_rate = config.sharding.tick_rate;
        Ok(Self {
            config,
            cluster: ZoneCluster {
                orchestrator,
                shards,
                control,
                tick_rate,
                tick: 0,
            },
        })
    }

    /// Runs the application until a shutdown signal arrives.
    ///
    /// Starts the cluster tick loop in a background task, waits for a
    /// termination signal, then drains the shards and reports final
    /// statistics.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the application ran and shut down successfully, or an
    /// error if there was a critical failure during execution.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Meridian Zone Cluster");

        self.log_configuration_summary();

        let tick_rate = self.cluster.tick_rate;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        // Drive the whole cluster from one task. Shards never read wall
        // time themselves; the loop stamps each tick from a monotonic
        // epoch so the state machines stay deterministic.
        let cluster_handle = {
            let mut cluster = self.cluster;
            tokio::spawn(async move {
                let epoch = Instant::now();
                let mut interval =
                    tokio::time::interval(Duration::from_millis(1000 / tick_rate.max(1) as u64));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                let report_interval = tick_rate as u64 * 60;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let now_ms = epoch.elapsed().as_millis() as u64;
                            cluster.tick(now_ms);

                            // Periodic health report
                            if cluster.tick % report_interval == 0 {
                                let stats = cluster.orchestrator.stats();
                                info!(
                                    "📊 Cluster Health - {} players | {} assigned | {} spillovers | {} rejected | {} zones lost",
                                    cluster.total_players(),
                                    stats.assigned,
                                    stats.spillovers,
                                    stats.rejected,
                                    stats.zones_lost
                                );
                            }
                        }
                        _ = shutdown_rx.changed() => break,
                    }
                }

                // Drain: stop admitting players, report what each shard held
                let now_ms = epoch.elapsed().as_millis() as u64;
                for shard in &mut cluster.shards {
                    shard.set_state(ZoneState::Draining);
                    shard.tick(now_ms);
                    info!(
                        "🧹 Zone {} draining with {} players",
                        shard.zone_id(),
                        shard.player_count()
                    );
                }

                let stats = cluster.orchestrator.stats();
                info!("📊 Final Statistics:");
                info!("  - Players assigned: {}", stats.assigned);
                info!("  - Spillover placements: {}", stats.spillovers);
                info!("  - Placements rejected: {}", stats.rejected);
                info!("  - Zones lost to heartbeat timeout: {}", stats.zones_lost);
            })
        };

        info!("✅ Meridian cluster is now running!");
        info!(
            "🎮 Zone shards listening from base port {}",
            self.config.sharding.base_port
        );
        info!("🔍 Health monitoring active - stats every 60 seconds");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        // Wait for shutdown signal
        signals::wait_for_shutdown().await?;

        // A second signal skips the graceful drain
        tokio::spawn(async move {
            if let Err(e) = signals::wait_for_shutdown_silent().await {
                error!("Failed to set up second-signal handler: {e}");
                return;
            }
            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        let _ = shutdown_tx.send(true);

        if let Err(e) =
            tokio::time::timeout(Duration::from_secs(8), cluster_handle).await
        {
            warn!("⏰ Cluster task did not complete within timeout: {e:?}");
        } else {
            info!("✅ Cluster task completed gracefully");
        }

        info!("✅ Meridian Zone Cluster shutdown complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        let sharding = &self.config.sharding;
        info!("📋 Configuration Summary:");
        info!(
            "  🗺️  Grid: {}x{} zones",
            self.config.world.grid_cols, self.config.world.grid_rows
        );
        info!(
            "  👻 Aura margin: {:.0} units | ownership threshold: {:.0} units",
            sharding.aura_margin, sharding.ownership_transfer_threshold
        );
        info!(
            "  ⏱️  Tick rate: {} Hz | aura sync: {} Hz",
            sharding.tick_rate, sharding.sync_rate
        );
        info!("  👥 Capacity: {} players per zone", sharding.max_players_per_zone);
        info!("  🌐 Base port: {}", sharding.base_port);
    }
}
