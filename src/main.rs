//! IPPool operator - reconciles metal3 IPPools against their claims

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use ippool_operator::controller::{error_policy, reconcile, Context, EventFilter, FIELD_MANAGER};
use ippool_operator::crd::{watch_filter_selector, IPAddressClaim, IPClaim, IPPool};
use ippool_operator::retry::{retry_with_backoff, RetryConfig};
use ippool_operator::telemetry::{init_tracing, LogFormat};
use ippool_operator::DEFAULT_CONCURRENCY;

/// IPPool operator - keeps IPPools in sync with the claims drawing from them
#[derive(Parser, Debug)]
#[command(name = "ippool-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller,
}

/// Controller mode arguments
#[derive(Args, Debug)]
struct ControllerArgs {
    /// Only reconcile objects labelled `cluster.x-k8s.io/watch-filter=<value>`
    #[arg(long, env = "WATCH_FILTER", global = true)]
    watch_filter: Option<String>,

    /// Restrict watches to one namespace (default: all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Maximum number of pools reconciled concurrently
    #[arg(long, env = "RECONCILE_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY, global = true)]
    concurrency: u16,

    /// Do not install or update the operator's CRDs on startup
    #[arg(long, env = "SKIP_CRD_INSTALL", global = true)]
    skip_crd_install: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let mut manifests = Vec::new();
        for crd in [IPPool::crd(), IPClaim::crd()] {
            manifests.push(
                serde_yaml::to_string(&crd)
                    .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?,
            );
        }
        println!("{}", manifests.join("---\n"));
        return Ok(());
    }

    init_tracing(cli.log_format)?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

/// Ensure the operator's own CRDs are installed
///
/// Installed with server-side apply so the CRD versions always match the
/// operator version. `IPAddressClaim` and `Cluster` belong to Cluster API and
/// are never installed here.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [IPPool::crd(), IPClaim::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let patch = Patch::Apply(&crd);
        tracing::info!(crd = %name, "installing CRD");
        retry_with_backoff(&RetryConfig::with_max_attempts(5), "install_crd", || {
            crds.patch(&name, &params, &patch)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("all IPPool CRDs installed/updated");
    Ok(())
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn watcher_config(watch_filter: Option<&str>) -> WatcherConfig {
    let config = WatcherConfig::default();
    match watch_filter_selector(watch_filter) {
        Some(selector) => config.labels(&selector),
        None => config,
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Run the IPPool controller until shutdown
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!(
        watch_filter = ?args.watch_filter,
        namespace = ?args.namespace,
        concurrency = args.concurrency,
        "IPPool controller starting..."
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if !args.skip_crd_install {
        ensure_crds_installed(&client).await?;
    }

    let namespace = args.namespace.as_deref();
    let watch_filter = args.watch_filter.as_deref();
    let pools: Api<IPPool> = scoped_api(&client, namespace);
    let ip_claims: Api<IPClaim> = scoped_api(&client, namespace);
    let address_claims: Api<IPAddressClaim> = scoped_api(&client, namespace);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received, cancelling in-flight reconciliations");
            shutdown.cancel();
        }
    });

    let ctx = Arc::new(
        Context::from_client(client.clone())
            .with_watch_filter(args.watch_filter.clone())
            .with_cancellation(shutdown),
    );
    let filter = EventFilter::new(args.watch_filter.clone());

    Controller::new(pools, watcher_config(watch_filter))
        .watches(ip_claims, watcher_config(watch_filter), filter.clone().ip_claims())
        .watches(
            address_claims,
            watcher_config(watch_filter),
            filter.address_claims(),
        )
        .with_config(ControllerConfig::default().concurrency(args.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((pool, action)) => {
                    tracing::debug!(pool = %pool, ?action, "IPPool reconciliation completed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "IPPool reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("IPPool controller shutting down");
    Ok(())
}
