use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use staffing_profiles::connection::config::{
    ENV_HOOK_BIND, ENV_SERVICE_KEY, ENV_STORE_URL,
};
use staffing_profiles::{
    DEFAULT_BATCH_CONCURRENCY, HookConfig, Identity, MemoryStore, Outcome, ProfileStore,
    Reconciler, Role, StoreConfig, build_router, connect, web::AppState,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "staffing-profiles")]
#[command(about = "Provision worker profiles in the staffing marketplace store")]
pub struct Cli {
    /// Use an in-process store instead of the hosted API (local smoke tests)
    #[arg(long, global = true)]
    memory: bool,

    /// Project base URL of the hosted store
    #[arg(long, env = ENV_STORE_URL, global = true)]
    store_url: Option<String>,

    /// Service-role key
    #[arg(long, env = ENV_SERVICE_KEY, hide_env_values = true, global = true)]
    service_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ensure one identity has a profile
    Reconcile {
        #[arg(long)]
        id: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        role: Role,
        #[arg(long, default_value = "")]
        full_name: String,
    },
    /// Reconcile every identity in a JSON array file
    Backfill {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_BATCH_CONCURRENCY)]
        concurrency: usize,
    },
    /// Run the provisioning hook service
    Serve {
        #[arg(long, env = ENV_HOOK_BIND)]
        bind: Option<String>,
    },
}

pub struct App {
    command: Command,
    reconciler: Reconciler,
}

impl App {
    pub fn new(cli: Cli) -> Result<Self> {
        let store: Arc<dyn ProfileStore> = if cli.memory {
            warn!("using in-memory store; nothing will be persisted");
            Arc::new(MemoryStore::new())
        } else {
            let config = StoreConfig::from_lookup(|key| match key {
                ENV_STORE_URL => cli.store_url.clone(),
                ENV_SERVICE_KEY => cli.service_key.clone(),
                other => std::env::var(other).ok(),
            })
            .context("invalid store configuration")?;
            connect(config).context("failed to open profile store")?
        };

        Ok(Self {
            command: cli.command,
            reconciler: Reconciler::new(store),
        })
    }

    pub async fn run(self) -> Result<ExitCode> {
        match self.command {
            Command::Reconcile {
                id,
                email,
                role,
                full_name,
            } => {
                let identity = Identity::new(id, email, full_name, role)?;
                let outcome = self.reconciler.reconcile(&identity).await;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                Ok(exit_code(&outcome))
            }
            Command::Backfill { file, concurrency } => {
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let identities: Vec<Identity> = serde_json::from_str(&raw)
                    .with_context(|| format!("{} is not a JSON array of identities", file.display()))?;

                info!(count = identities.len(), concurrency, "starting backfill");
                let report = self.reconciler.reconcile_all(&identities, concurrency).await;
                println!("{}", serde_json::to_string_pretty(&report)?);

                if report.summary.requires_manual_setup > 0 {
                    error!(
                        failed = report.summary.requires_manual_setup,
                        "store needs manual setup before the backfill can finish"
                    );
                    Ok(ExitCode::from(2))
                } else if report.summary.failed > 0 {
                    Ok(ExitCode::FAILURE)
                } else {
                    Ok(ExitCode::SUCCESS)
                }
            }
            Command::Serve { bind } => {
                let mut config = HookConfig::from_env();
                if let Some(bind) = bind {
                    config.bind = bind;
                }
                if config.secret.is_none() {
                    warn!("hook secret not set; the reconcile endpoint is unauthenticated");
                }

                let router = build_router(AppState::new(self.reconciler, &config));
                let listener = tokio::net::TcpListener::bind(&config.bind)
                    .await
                    .with_context(|| format!("failed to bind to {}", config.bind))?;

                info!(address = %config.bind, "provisioning hook listening");
                axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown_signal())
                    .await
                    .context("server error")?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn exit_code(outcome: &Outcome) -> ExitCode {
    match outcome {
        Outcome::Failed {
            requires_manual_setup: true,
            ..
        } => ExitCode::from(2),
        Outcome::Failed { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
