//! Scene-frame extraction binary.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sceneflow_models::RunId;
use sceneflow_storage::store_from_env;
use sceneflow_webhook::WebhookDispatcher;
use sceneflow_worker::{ExtractionController, PipelineConfig, RunRequest};

/// Extract scene-change frames from a video and upload them as they appear.
#[derive(Debug, Parser)]
#[command(name = "sceneflow", version)]
struct Cli {
    /// Video file to process
    video: PathBuf,

    /// Scene-change threshold in [0.0, 1.0]
    #[arg(long)]
    threshold: Option<f64>,

    /// Extra endpoint that receives the analysis notification
    #[arg(long)]
    callback_url: Option<String>,

    /// Directory under which frames are written
    #[arg(long, env = "WORKER_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Run identifier; generated when absent
    #[arg(long)]
    run_id: Option<String>,
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("sceneflow=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Required before any HTTPS client is built
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_env();
    if let Some(work_dir) = cli.work_dir {
        config.work_dir = work_dir;
    }
    info!("Starting sceneflow, config: {:?}", config);

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    let store = store_from_env(&config.storage_backend)
        .with_context(|| format!("failed to create {} store", config.storage_backend))?;
    let dispatcher =
        WebhookDispatcher::new(config.webhook.clone()).context("failed to build webhook client")?;

    let mut request = RunRequest::new(cli.video);
    request.threshold = cli.threshold;
    request.callback_url = cli.callback_url;
    request.run_id = cli.run_id.map(RunId::from_string);

    let controller = ExtractionController::new(config, store);
    let (result, report) = controller.run_and_notify(request, &dispatcher).await;
    info!(
        analysis = ?report.analysis,
        ready = ?report.ready,
        callback = ?report.callback,
        "Notifications dispatched"
    );

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
