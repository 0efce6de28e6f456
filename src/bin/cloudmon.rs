use clap::{Parser, ValueEnum};
use cloud_monitoring::{
    config::read_config_file,
    cycle::{CycleHandle, MonitoringCycle, cycle_interval},
    storage,
    util::resolve_config_path,
};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    Hypervisor,
    Cloud,
}

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (falls back to CLOUDMON_CONFIG)
    #[arg(short, long)]
    file: Option<String>,

    /// Stages to run; defaults to every stage with a config section
    #[arg(short, long, value_enum)]
    stage: Vec<Stage>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("cloud_monitoring", level),
        ("cloudmon", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let config = read_config_file(&resolve_config_path(args.file.clone()))?;

    let (hypervisor, cloud) = if args.stage.is_empty() {
        (config.hypervisor.is_some(), config.cloud.is_some())
    } else {
        (
            args.stage.contains(&Stage::Hypervisor),
            args.stage.contains(&Stage::Cloud),
        )
    };

    let session = storage::open(&config.storage).await?;
    let health = session.health_check().await?;
    info!("{}", health.message);
    debug!("storage metadata: {:?}", health.metadata);

    let mut cycle = MonitoringCycle::from_config(&config, session.clone(), hypervisor, cloud)?;

    if args.once {
        let result = cycle.run_once().await;
        session.close().await?;
        let report = result?;
        info!("{report:?}");
        return Ok(());
    }

    let period = cycle_interval(&config);
    info!("running a cycle every {}s", period.as_secs());
    let (handle, task) = CycleHandle::spawn(cycle, period);

    tokio::signal::ctrl_c().await?;
    info!("interrupted, finishing the current cycle");
    if let Err(e) = handle.shutdown().await {
        warn!("{e:#}");
    }
    task.await?;

    Ok(())
}
