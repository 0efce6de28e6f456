use chrono::Utc;
use clap::{Parser, Subcommand};
use cloud_monitoring::{
    alerts::AlertService, config::read_config_file, report::usage_report, storage,
    util::resolve_config_path,
};
use serde::Serialize;
use tracing::{level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (falls back to CLOUDMON_CONFIG)
    #[arg(short, long)]
    file: Option<String>,

    #[arg(long, default_value = "warn")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List the unread alerts of a project
    Unread { project: String },

    /// List the read alerts of a project
    Read { project: String },

    /// Tag alerts as read
    MarkRead {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Tag alerts as unread
    MarkUnread {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Delete alerts read for longer than the configured retention
    Purge,

    /// Tier averages of hypervisor domains
    Usage {
        #[arg(required = true)]
        uuids: Vec<String>,
    },
}

#[derive(Debug, Serialize)]
struct Tagged {
    tagged: usize,
}

#[derive(Debug, Serialize)]
struct Purged {
    purged: usize,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("cloud_monitoring", level),
        ("cloudmon_alerts", level),
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

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let config = read_config_file(&resolve_config_path(args.file.clone()))?;
    let session = storage::open(&config.storage).await?;
    let service = AlertService::new(session.clone());

    let result = match &args.command {
        Command::Unread { project } => print_json(&service.unread(project).await?),
        Command::Read { project } => print_json(&service.read(project).await?),
        Command::MarkRead { ids } => print_json(&Tagged {
            tagged: service.mark_read(ids).await?,
        }),
        Command::MarkUnread { ids } => print_json(&Tagged {
            tagged: service.mark_unread(ids).await?,
        }),
        Command::Purge => print_json(&Purged {
            purged: service.purge_read(config.read_retention, Utc::now()).await?,
        }),
        Command::Usage { uuids } => print_json(&usage_report(&session, uuids).await?),
    };

    session.close().await?;
    result
}
