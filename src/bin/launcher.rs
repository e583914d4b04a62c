//! AVB Stream Launcher
//!
//! Starts (or attaches to) the gPTP, MRP and MAAP daemons, then runs every
//! stream record given on the command line until its application exits.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use avb_launcher::{
    avdecc::UnavailableNegotiator,
    config::LauncherConfig,
    daemons::{ensure_running, DaemonSpec},
    gptp::{ClockSource, SharedMemoryClock},
    lifecycle::{Services, ShellLauncher, StreamMachine},
    maap::AllocatorClient,
    netif,
    orchestrator::Orchestrator,
    srp::{MrpHelper, MrpReserver},
    stream::{load_records, Environment, StreamContext},
};

#[derive(Parser, Debug)]
#[command(name = "avblauncher", version, about = "Launch and supervise AVB talker and listener streams")]
struct Args {
    /// Start the gPTP daemon with this config file if it is not running
    #[arg(short = 'g', value_name = "GPTP_CONFIG")]
    gptp_config: Option<String>,

    /// Start the MRP daemon if it is not running
    #[arg(short = 'm')]
    start_mrpd: bool,

    /// Start the MAAP daemon if it is not running
    #[arg(short = 'a')]
    start_maap: bool,

    /// Network interface (default from config, else eth0)
    #[arg(short = 'i', long)]
    interface: Option<String>,

    /// Launcher config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    /// Stream record files, one per stream
    #[arg(required = true, value_name = "RECORD")]
    records: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting AVB stream launcher");

    let config = LauncherConfig::load(args.config.as_deref()).context("Failed to load config")?;
    let interface = args
        .interface
        .clone()
        .unwrap_or_else(|| config.interface.name.clone());
    let local_addr = netif::hardware_address(&interface)
        .with_context(|| format!("Could not get hardware address of {}", interface))?;
    tracing::info!("Using {} ({})", interface, local_addr);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping streams");
            shutdown.cancel();
        }
    });

    let timing = &config.timing;

    // gPTP daemon and its shared memory
    let gptp_config_file = args
        .gptp_config
        .clone()
        .unwrap_or_else(|| config.gptp.config_file.clone());
    let gptp = DaemonSpec::gptp(
        &config.gptp.daemon,
        &interface,
        &gptp_config_file,
        args.gptp_config.is_some(),
    );
    let clock: Option<Arc<dyn ClockSource>> = if ensure_running(&gptp).await {
        let clock = SharedMemoryClock::open_with_retry(
            &config.gptp.shm_name,
            config.gptp.layout,
            timing.open_attempts,
            timing.open_retry_delay(),
        )
        .await
        .context("Could not open shared memory of the gPTP daemon")?;
        Some(Arc::new(clock))
    } else {
        None
    };

    let mrp = DaemonSpec::mrp(&config.srp.daemon, &interface, args.start_mrpd);
    let srp_available = ensure_running(&mrp).await;

    // MAAP daemon socket
    let maap = DaemonSpec::maap(
        &config.maap.daemon,
        &interface,
        &config.maap.log_file,
        args.start_maap,
    );
    let allocator = if ensure_running(&maap).await {
        let mut client = AllocatorClient::connect(
            &config.maap.address,
            timing.open_attempts,
            timing.open_retry_delay(),
            config.maap.reserve_retries,
        )
        .await
        .context("Could not open socket interface of the MAAP daemon")?;
        client
            .init(config.maap.range_start()?.to_u64(), config.maap.range_count)
            .await
            .context("MAAP daemon init failed")?;
        Some(client)
    } else {
        None
    };

    // Stream contexts
    let mut contexts = Vec::new();
    for (name, record) in load_records(&args.records) {
        match StreamContext::from_record(name.clone(), &record) {
            Ok(mut ctx) => {
                ctx.attach_local_address(&interface, local_addr);
                contexts.push(ctx);
            }
            Err(e) => tracing::error!(stream = %name, "Invalid stream record: {}", e),
        }
    }
    if contexts.is_empty() {
        bail!("Could not create any stream context");
    }

    let environment = Environment {
        clock_available: clock.is_some(),
        srp_available,
        allocator_available: allocator.is_some(),
    };
    let services = Services {
        clock,
        negotiator: Arc::new(UnavailableNegotiator),
        reserver: Arc::new(MrpReserver::new(&config.srp.helper)),
        launcher: Arc::new(ShellLauncher),
    };
    let machine = StreamMachine::new(services, timing.machine_settings(), cancel);

    let mut orchestrator = Orchestrator::new(
        machine,
        Arc::new(MrpHelper::new(&config.srp.helper)),
        allocator,
        environment,
    );
    let report = orchestrator.run(contexts).await?;
    report.log_summary();

    tracing::info!("AVB stream launcher stopped");
    Ok(())
}
