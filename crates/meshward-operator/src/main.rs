//! meshward - Istio proxy sidecar resets and sidecar removal

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use meshward_common::kube_utils::create_client;
use meshward_common::retry::RetryConfig;
use meshward_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use meshward_sidecars::{
    build_warning_message, remove_sidecars, ProxyRestart, SidecarKubeClient,
    RestartOutcome, SidecarKubeClientImpl, SidecarsReconciler,
};

use config::ProxyResetArgs;

/// meshward - keeps Istio proxy sidecars in line with the installed mesh
#[derive(Parser, Debug)]
#[command(name = "meshward", version, about, long_about = None)]
struct Cli {
    /// Path to a kubeconfig file (in-cluster config when unset)
    #[arg(long, env = "KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Log line format: json or text
    #[arg(long, env = "MESHWARD_LOG_FORMAT", default_value = "json", global = true)]
    log_format: LogFormat,

    /// Log filter directives, overriding RUST_LOG
    #[arg(long, env = "MESHWARD_LOG_FILTER", global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Restart pods whose sidecar is outdated or misconfigured
    ///
    /// Platform workloads are restarted first and without limits; customer
    /// workloads follow in bounded batches. Exits non-zero when the pass fails.
    Restart(ProxyResetArgs),

    /// Restart every pod still carrying an injected sidecar
    ///
    /// Run after the mesh has been uninstalled so pods come back without it.
    RemoveSidecars,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        filter: cli.log_filter.clone(),
    })?;

    let client = create_client(cli.kubeconfig.as_deref()).await?;
    let client: Arc<dyn SidecarKubeClient> = Arc::new(SidecarKubeClientImpl::new(client));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current restart");
            signal_cancel.cancel();
        }
    });

    match cli.command {
        Commands::Restart(args) => run_restart(client, args, cancel).await,
        Commands::RemoveSidecars => run_remove(client, cancel).await,
    }
}

/// Run one proxy reset pass and report the resulting condition
async fn run_restart(
    client: Arc<dyn SidecarKubeClient>,
    args: ProxyResetArgs,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let settings = args.settings()?;
    let limits = args.limits()?;
    let change = args.mesh.change();

    let proxy = ProxyRestart::new(client, args.platform(), limits, cancel);
    let reconciler = SidecarsReconciler::new(Arc::new(proxy), settings);
    let result = reconciler.reconcile(&change).await;

    let outcome = &result.outcome;
    info!(
        reason = outcome.reason(),
        message = outcome.message(),
        requeue_after_secs = result.requeue_after.map(|d| d.as_secs()),
        "proxy sidecar reset finished"
    );
    println!("{}: {}", outcome.reason(), outcome.message());

    if let RestartOutcome::Failed { message } = outcome {
        anyhow::bail!("proxy sidecar reset failed: {message}");
    }
    Ok(())
}

/// Restart every injected pod after mesh removal
async fn run_remove(
    client: Arc<dyn SidecarKubeClient>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let warnings = match remove_sidecars(client, RetryConfig::kube_default(), cancel).await {
        Ok(warnings) => warnings,
        Err(e) => {
            error!(error = %e, "sidecar removal failed");
            return Err(e.into());
        }
    };

    if warnings.is_empty() {
        info!("sidecar removal finished");
    } else {
        let message = build_warning_message(&warnings);
        warn!(warnings = warnings.len(), message = %message, "sidecar removal finished with warnings");
        println!("{message}");
    }
    Ok(())
}
