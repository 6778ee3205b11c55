use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use tokio::task::JoinError;

use syncguard::configuration::get_configuration;
use syncguard::domain::Source;
use syncguard::startup::get_connection_pool;
use syncguard::startup::Application;
use syncguard::telemetry::get_subscriber;
use syncguard::telemetry::init_subscriber;

/// Event ingestion and reconciliation core for sources T, M, and C.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the combined service: ingress + pollers + dispatcher + webhook manager.
    Serve,
    /// Run one manual backfill cycle for a single source and exit.
    Backfill {
        #[arg(long, value_enum)]
        source: SourceArg,
    },
    /// Print queue depth per state and exit.
    Status,
    /// Load and validate configuration, then exit.
    CheckConfig,
}

#[derive(Clone, clap::ValueEnum)]
enum SourceArg {
    T,
    M,
    C,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::T => Source::T,
            SourceArg::M => Source::M,
            SourceArg::C => Source::C,
        }
    }
}

fn report_exit(name: &str, outcome: Result<Result<(), impl Debug + Display>, JoinError>) {
    match outcome {
        Ok(Ok(())) => tracing::info!("{name} exited gracefully"),
        Ok(Err(e)) => tracing::error!(error.cause_chain = ?e, error.message = %e, "{name} failed (inner)"),
        Err(e) => tracing::error!(error.cause_chain = ?e, error.message = %e, "{name} failed (outer)"),
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::CheckConfig => match get_configuration() {
            Ok(_) => {
                println!("configuration OK");
                Ok(())
            }
            Err(e) => {
                eprintln!("configuration error: {e}");
                std::process::exit(1);
            }
        },
        Command::Status => {
            let cfg = get_configuration().map_err(|e| anyhow::anyhow!(e))?;
            let subscriber = get_subscriber("syncguard", &cfg.log_level, std::io::stdout);
            init_subscriber(subscriber);
            let pool = get_connection_pool(&cfg.database);
            let queue = syncguard::queue::Queue::new(pool);
            for (state, count) in queue.depth_by_state().await? {
                println!("{state}: {count}");
            }
            Ok(())
        }
        Command::Backfill { source } => {
            let cfg = get_configuration().map_err(|e| anyhow::anyhow!(e))?;
            let subscriber = get_subscriber("syncguard", &cfg.log_level, std::io::stdout);
            init_subscriber(subscriber);
            let app = Application::build(cfg).await?;
            let source: Source = source.into();
            match app.pollers.iter().find(|p| p.source() == source) {
                Some(poller) => {
                    let n = poller.run_once().await?;
                    println!("enqueued {n} descriptors for {source}");
                    Ok(())
                }
                None => {
                    eprintln!("source {source} is not configured");
                    std::process::exit(1);
                }
            }
        }
        Command::Serve => serve().await,
    }
}

async fn serve() -> Result<(), anyhow::Error> {
    let cfg = get_configuration()?;
    let subscriber = get_subscriber("syncguard", &cfg.log_level, std::io::stdout);
    init_subscriber(subscriber);

    let disable_webhooks = cfg.disable_webhooks;
    let backfill_interval = Duration::from_secs(cfg.periodic_backfill_interval_seconds);
    let poll_interval = if disable_webhooks { Duration::from_secs(5) } else { backfill_interval };

    let app = Application::build(cfg).await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (server, pollers, worker, webhook_manager, public_base_url) = app.into_parts();

    let server_thread = tokio::spawn(server);

    let mut poller_threads = Vec::new();
    for poller in &pollers {
        let poller = Arc::clone(poller);
        let rx = shutdown_rx.clone();
        poller_threads.push(tokio::spawn(async move {
            poller.run(poll_interval, rx).await;
            Ok::<(), anyhow::Error>(())
        }));
    }

    let worker_rx = shutdown_rx.clone();
    let worker_thread = tokio::spawn(async move {
        worker.run(Duration::from_secs(1), worker_rx).await;
        Ok::<(), anyhow::Error>(())
    });

    if let Some(manager) = &webhook_manager {
        if let Some(url) = &public_base_url {
            manager.reconcile(url).await;
        }
    }

    tokio::select! {
        o = server_thread => { report_exit("ingress server", o) },
        o = worker_thread => { report_exit("dispatcher", o) },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    }

    for handle in poller_threads {
        let _ = handle.await;
    }

    Ok(())
}
