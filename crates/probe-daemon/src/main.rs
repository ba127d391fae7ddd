// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::Parser;
use probe_broker::InMemoryBroker;
use probe_codec::{HttpSchemaRegistry, SchemaCodec, SchemaProvider, StaticSchemaRegistry};
use probe_config::{ProbeConfig, load_config, validate_config};
use probe_daemon::{AppState, build_app};
use probe_runner::{NoopRunner, ProcessRunner, ScenarioRuntime};
use probe_scheduler::{Guardian, GuardianConfig, Ports, SchedulerSettings};
use probe_storage::{ArtifactStore, LocalStore, MemoryStore};
use probe_vault::{CredentialVault, EnvVault, FileVault};
use probe_workspace::WorkspaceLayout;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "probe-daemon", version, about = "Test-Probe daemon")]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "127.0.0.1:8095")]
    bind: String,

    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable request/scheduler debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("load configuration")?;

    let filter = if args.debug {
        EnvFilter::new("probe=debug")
    } else {
        let level = config.log_level.as_deref().unwrap_or("info");
        EnvFilter::new(format!("probe={level}"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let warnings = validate_config(&config).context("validate configuration")?;
    for warning in warnings {
        warn!(target: "probe.daemon", %warning, "configuration warning");
    }

    let ports = build_ports(&config)?;
    let settings = scheduler_settings(&config);
    let guardian_config = GuardianConfig {
        max_restarts: config.guardian.max_restarts,
        window: config.guardian.window(),
    };

    let guardian = Guardian::new(ports, settings, guardian_config);
    let (scheduler, guardian_task) = guardian.initialize();

    let state = Arc::new(AppState {
        scheduler: scheduler.clone(),
    });
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(target: "probe.daemon", bind = %args.bind, "probe-daemon listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    tokio::select! {
        served = serve => {
            served.context("serve")?;
            info!(target: "probe.daemon", "shutting down");
            scheduler.shutdown().await;
        }
        supervised = guardian_task => {
            // The guardian only completes early on a fatal supervision
            // failure; exit non-zero.
            supervised.context("guardian task")??;
            bail!("guardian exited unexpectedly");
        }
    }

    Ok(())
}

fn build_ports(config: &ProbeConfig) -> Result<Ports> {
    let storage: Arc<dyn ArtifactStore> = match config.storage.provider.as_str() {
        "local" => Arc::new(LocalStore::new(
            config.storage.root.as_ref().map(PathBuf::from),
        )),
        "memory" => {
            warn!(target: "probe.daemon", "in-memory storage keeps nothing across restarts");
            Arc::new(MemoryStore::new())
        }
        other => bail!("unknown storage provider '{other}'"),
    };

    let required_fields = config.vault.required_fields.clone();
    let vault: Arc<dyn CredentialVault> = match config.vault.provider.as_str() {
        "file" => {
            let path = config
                .vault
                .path
                .as_ref()
                .context("vault.path is required for the file provider")?;
            Arc::new(FileVault::new(path, required_fields))
        }
        "env" => Arc::new(EnvVault::new(required_fields)),
        other => bail!("unknown vault provider '{other}'"),
    };

    let broker: Arc<dyn probe_broker::BrokerFactory> = match config.broker.provider.as_str() {
        "memory" => Arc::new(InMemoryBroker::new()),
        #[cfg(feature = "kafka")]
        "kafka" => Arc::new(probe_broker::kafka::KafkaBroker::new()),
        #[cfg(not(feature = "kafka"))]
        "kafka" => bail!("this binary was built without the 'kafka' feature"),
        other => bail!("unknown broker provider '{other}'"),
    };

    let provider: Arc<dyn SchemaProvider> = match &config.schema.registry_url {
        Some(url) => Arc::new(HttpSchemaRegistry::new(url.clone())),
        None => {
            warn!(target: "probe.daemon", "no schema registry configured; all subjects will be unknown");
            Arc::new(StaticSchemaRegistry::new())
        }
    };
    let codec = SchemaCodec::new(provider);

    let runner: Arc<dyn ScenarioRuntime> = match &config.runner.command {
        Some(command) => Arc::new(ProcessRunner::new(command.clone(), config.runner.args.clone())),
        None => {
            warn!(target: "probe.daemon", "no runner command configured; using the no-op runner");
            Arc::new(NoopRunner)
        }
    };

    Ports::builder()
        .storage(storage)
        .vault(vault)
        .broker(broker)
        .codec(codec)
        .runner(runner)
        .build()
        .map_err(|missing| anyhow::anyhow!(missing))
}

fn scheduler_settings(config: &ProbeConfig) -> SchedulerSettings {
    SchedulerSettings {
        max_concurrent: config.scheduler.max_concurrent,
        ask_timeout: config.scheduler.ask_timeout(),
        retention: config.scheduler.retention(),
        startup_deadline: config.streams.startup_deadline(),
        commit_batch_size: config.streams.commit_batch_size,
        commit_interval: config.streams.commit_interval(),
        stop_flush_timeout: config.streams.stop_flush_timeout(),
        default_bootstrap_servers: config.broker.default_bootstrap_servers.clone(),
        key_record: "EventKey".into(),
        layout: WorkspaceLayout {
            features_path: config.bucket.features_path.clone(),
            manifest_path: config.bucket.manifest_path.clone(),
        },
    }
}
