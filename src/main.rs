//! pano-nav
//!
//! Runs a navigation script against a headless view and prints the
//! resulting timeline as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pano_nav::{
    next_event, AnalysisResult, HeadlessView, HttpPanoramaProvider, InMemoryPanoramaProvider,
    NavigationConfig, NavigationEvent, Navigator, PanoramaDataProvider,
};

/// Default configuration path
const DEFAULT_CONFIG_PATH: &str = "config/navigation.yaml";

#[derive(Debug, Parser)]
#[command(name = "pano-nav", about = "Drive panorama navigation from a script")]
struct Args {
    /// Navigation config (YAML). Defaults are used when the file is absent.
    #[arg(long, env = "PANO_NAV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Panorama fixtures (JSON array). Uses the HTTP provider when omitted.
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Panorama the view starts on
    #[arg(long)]
    start: Option<String>,

    /// Analysis results to replay (JSON array)
    #[arg(long)]
    script: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pano_nav=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        tracing::info!(path = %args.config.display(), "Loading configuration");
        NavigationConfig::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        tracing::info!(path = %args.config.display(), "Config not found, using defaults");
        NavigationConfig::default()
    };

    let provider: Arc<dyn PanoramaDataProvider> = match (&args.fixtures, &config.provider) {
        (Some(path), _) => {
            let provider = InMemoryPanoramaProvider::from_json_file(path)
                .with_context(|| format!("loading fixtures {}", path.display()))?;
            tracing::info!(panoramas = provider.len(), "Using fixture provider");
            Arc::new(provider)
        }
        (None, Some(provider_config)) => {
            tracing::info!(base_url = %provider_config.base_url, "Using HTTP provider");
            Arc::new(HttpPanoramaProvider::from_config(provider_config)?)
        }
        (None, None) => anyhow::bail!("either --fixtures or a provider config section is required"),
    };

    let script_content = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading script {}", args.script.display()))?;
    let script: Vec<AnalysisResult> =
        serde_json::from_str(&script_content).context("parsing script")?;

    let view = Arc::new(HeadlessView::new(args.start.clone()));
    let navigator = Navigator::new(config, provider, view).context("invalid navigation config")?;
    let eviction = navigator.spawn_eviction_loop();

    if let Some(start) = &args.start {
        let report = navigator.cache().batch_preload(&[start.as_str()]).await;
        if !report.failed.is_empty() {
            tracing::warn!(start = %start, "Start panorama could not be preloaded");
        }
    }

    let mut events = navigator.queue().subscribe_events();
    tokio::spawn(async move {
        while let Some(event) = next_event(&mut events).await {
            if let NavigationEvent::OperationFailed {
                sequence, error, ..
            } = event
            {
                tracing::warn!(sequence, error = %error, "Operation dropped");
            }
        }
    });

    for (step, result) in script.iter().enumerate() {
        match result.to_operation() {
            Ok(Some(operation)) => {
                navigator.queue().enqueue(operation);
            }
            Ok(None) => {
                tracing::info!(step, "Analysis complete, ignoring remaining steps");
                break;
            }
            Err(e) => tracing::warn!(step, error = %e, "Skipping script step"),
        }
    }

    navigator.queue().wait_until_idle().await;
    eviction.abort();

    let timeline = navigator.queue().timeline();
    println!("{}", serde_json::to_string_pretty(&timeline)?);

    Ok(())
}
