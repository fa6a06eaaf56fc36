mod config;

use clap::{Args, Parser, Subcommand};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const METRICS_PREFIX: &str = "xds_router";

#[derive(Parser)]
#[command(name = "xds-router", about = "xDS control plane routing proxies into priority groups")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Start the control plane and serve until interrupted
    Run(ConfigArgs),
    /// Load and validate a config file, then exit
    Validate(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Run(args) => {
            let config = load_config(&args.config_file);
            let _sentry = init_logging(&config.logging);
            if let Some(metrics_config) = &config.metrics {
                init_metrics(metrics_config);
            }
            run(config);
        }
        CliCommand::Validate(args) => {
            load_config(&args.config_file);
            println!("{} is valid", args.config_file.display());
        }
    }
}

fn load_config(path: &Path) -> Config {
    match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", path.display());
            process::exit(1);
        }
    }
}

fn init_logging(config: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let sentry_guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = sentry_guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_filter(env_filter))
        .with(sentry_layer)
        .init();

    sentry_guard
}

fn init_metrics(config: &MetricsConfig) {
    let recorder = match StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
    {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build statsd recorder");
            process::exit(1);
        }
    };

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::error!("A metrics recorder is already installed");
        process::exit(1);
    }
    shared::metrics_defs::describe_all(control_plane::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Reporting metrics to statsd"
    );
}

fn run(config: Config) {
    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start tokio runtime");
            process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(control_plane::run(config.control_plane)) {
        tracing::error!(error = %e, "Control plane exited with an error");
        process::exit(1);
    }
}
