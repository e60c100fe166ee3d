use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dashsnap::{
    BasicChartRenderer, CaptureSession, Color, DashboardSnapshot, DomRasterizer, ExportConfig, Exporter,
    LiveDashboard, RasterOptions, Rasterizer, DASHBOARD_ROOT_ID,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dashsnap", version, about = "Capture an analytics dashboard and export it")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture the dashboard into a PNG without contacting the compositor
    Render {
        /// Analysis snapshot (JSON)
        #[arg(long)]
        snapshot: PathBuf,
        /// Where to write the PNG
        #[arg(long)]
        out: PathBuf,
        /// Export configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Capture the dashboard, send it to the compositor and save the artifact
    Export {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override `compositor_url`
        #[arg(long)]
        compositor: Option<String>,
        /// Override `download_dir`
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

fn load_snapshot(path: &Path) -> Result<DashboardSnapshot> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    DashboardSnapshot::from_json(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<ExportConfig> {
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            Ok(ExportConfig::from_json(&raw)?)
        }
        None => Ok(ExportConfig::default()),
    }
}

async fn render(snapshot: &Path, out: &Path, config: Option<&Path>) -> Result<()> {
    let cfg = load_config(config)?;
    let dashboard = LiveDashboard::mount(load_snapshot(snapshot)?, Arc::new(BasicChartRenderer::default()))?;
    dashboard.wait_rendered(Duration::from_millis(cfg.render_timeout_ms)).await?;

    let options = RasterOptions {
        background_color: Color::parse(&cfg.background_color)?,
        pixel_ratio: cfg.pixel_ratio,
    };
    let rasterizer = DomRasterizer::new(cfg.viewport_width, Duration::from_millis(cfg.resource_timeout_ms));

    let document = dashboard.document();
    let session = CaptureSession::begin(document.lock().await, DASHBOARD_ROOT_ID)?;
    let raster = rasterizer.rasterize(session.document(), session.root(), &options).await;
    session.finish();
    let raster = raster?;

    std::fs::write(out, &raster.png_data).with_context(|| format!("writing {}", out.display()))?;
    println!("{} ({}x{})", out.display(), raster.width, raster.height);
    Ok(())
}

async fn export(
    snapshot: &Path,
    config: Option<&Path>,
    compositor: Option<String>,
    out_dir: Option<PathBuf>,
) -> Result<()> {
    let mut cfg = load_config(config)?;
    if let Some(url) = compositor {
        cfg.compositor_url = url;
    }
    if let Some(dir) = out_dir {
        cfg.download_dir = dir;
    }
    let exporter = Exporter::new(cfg)?;
    let dashboard = LiveDashboard::mount(load_snapshot(snapshot)?, Arc::new(BasicChartRenderer::default()))?;
    let outcome = exporter.export_dashboard(&dashboard.export_target()).await?;
    println!("{}", outcome.path.display());
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "dashsnap=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Render { snapshot, out, config } => render(&snapshot, &out, config.as_deref()).await,
        Command::Export { snapshot, config, compositor, out_dir } => {
            export(&snapshot, config.as_deref(), compositor, out_dir).await
        }
    };
    if let Err(e) = result {
        eprintln!("dashsnap failed: {:#}", e);
        std::process::exit(1);
    }
}
