mod config;
use clap::{Parser, Subcommand};
use config::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod server;
use accesscounter_core::{Counter, CounterRenderer, ReadCounterOperation, redact_lock_url};
use server::run_server;

#[derive(Parser)]
#[command(name = "accesscounter")]
#[command(about = "Visit counter on object storage, guarded by a lease lock")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Print the stored counter without taking the lock
    Show {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

fn default_filter() -> &'static str {
    match std::env::var("DEBUG") {
        Ok(value) if !value.is_empty() => "accesscounter=debug",
        _ => "accesscounter=info",
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            tracing::info!("Starting accesscounter server with config: {}", config);
            let cfg = load_config(&config);

            let renderer = match CounterRenderer::with_default_font() {
                Ok(renderer) => renderer,
                Err(error) => {
                    tracing::error!("Failed to load counter font: {}", error);
                    std::process::exit(1);
                }
            };

            tracing::info!(
                "Bind: {}, Lock: {}, Object: {}",
                cfg.bind_addr,
                redact_lock_url(&cfg.lock.url),
                cfg.store.object_path
            );

            if let Err(e) = run_server(cfg, renderer).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Show { config } => {
            let cfg = load_config(&config);
            match show_counter(&cfg).await {
                Ok(line) => println!("{}", line),
                Err(e) => {
                    tracing::error!("Failed to read counter: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn load_config(path: &str) -> Config {
    match Config::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}

async fn show_counter(config: &Config) -> accesscounter_core::Result<String> {
    let store = config.store_builder().build()?;
    let counter = ReadCounterOperation::new(store).run().await?.counter();
    Ok(counter_record_json(&counter))
}

/// One-line JSON for `show`. `visit` is always present, even when zero.
fn counter_record_json(counter: &Counter) -> String {
    let mut record = serde_json::json!({ "visit": counter.visit_count });
    if let Some(last_access) = counter.last_access_time {
        record["last_access"] = serde_json::json!(last_access);
    }
    record.to_string()
}
