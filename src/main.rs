use anyhow::Context;
use clap::Parser;
use pg_poller::config::SinkKind;
use pg_poller::kafka::KafkaSink;
use pg_poller::postgres::PostgresSource;
use pg_poller::sink::{EventSink, JsonSerializer, SerializationFormat, StdoutSink};
use pg_poller::{Config, Poller, PollerSettings};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "pg-poller")]
#[command(about = "Query-polling change data capture for PostgreSQL", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting pg-poller");
    info!("Loading configuration from {:?}", args.config);

    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {:?}", args.config))?;
    let settings = PollerSettings::from_config(&config)?;

    info!(
        postgres_host = %config.postgres.host,
        postgres_port = %config.postgres.port,
        postgres_database = %config.postgres.database,
        primary_key = %settings.primary_key,
        enable_delete = settings.enable_delete,
        sink = ?config.sink.kind,
        "Configuration summary"
    );

    let serializer = JsonSerializer::new(config.sink.format);
    match config.sink.kind {
        SinkKind::Kafka => {
            let kafka = config
                .kafka
                .as_ref()
                .context("sink.kind = \"kafka\" requires a [kafka] section")?;
            let sink = KafkaSink::new(kafka, serializer, &settings.primary_key)?;
            run(&config, settings, sink).await
        }
        SinkKind::Stdout => {
            if config.sink.format == SerializationFormat::Json {
                warn!("sink.format = \"json\" is ignored by the stdout sink; writing JSON lines");
            }
            run(&config, settings, StdoutSink::new()).await
        }
    }
}

async fn run<K: EventSink + 'static>(
    config: &Config,
    settings: PollerSettings,
    sink: K,
) -> anyhow::Result<()> {
    let source = PostgresSource::new(&config.postgres);
    let handle = Poller::new(settings, source, sink).spawn();
    let mut state = handle.subscribe();

    tokio::select! {
        _ = handle_ctrl_c() => {
            info!("Shutdown requested, stopping poller");
            handle.cancel();
        }
        _ = state.wait_for(|s| s.is_terminal()) => {}
    }

    if let Err(e) = handle.join().await {
        error!("Poller stopped with error: {}", e);
        return Err(e.into());
    }

    info!("pg-poller stopped");
    Ok(())
}

async fn handle_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("pg_poller=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pg_poller=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
