use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use foundation::math::{LngLat, mercator_to_lng_lat};
use streaming::HttpFetcher;
use tokio::runtime::Handle;
use tools::{Engine, EngineConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive the tile engine headlessly along a camera path")]
struct Args {
    /// JSON engine config (defaults plus TILEWALK_* environment overrides if absent)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of frames to run
    #[arg(long, default_value_t = 600)]
    frames: u64,

    /// Frame interval in milliseconds
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// Target longitude (degrees); overrides the config view
    #[arg(long, allow_hyphen_values = true)]
    lng: Option<f64>,

    /// Target latitude (degrees); overrides the config view
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,

    /// Camera distance (meters)
    #[arg(long)]
    distance: Option<f64>,

    /// Pitch (degrees, 0 looks straight down)
    #[arg(long)]
    pitch: Option<f64>,

    /// Bearing change per frame (degrees)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    orbit: f64,

    /// Log a summary every N frames
    #[arg(long, default_value_t = 60)]
    report_every: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref())?;

    let mut view = config.view.clone();
    if let (Some(lng), Some(lat)) = (args.lng, args.lat) {
        view.target = LngLat::new(lng, lat);
    } else if args.lng.is_some() || args.lat.is_some() {
        warn!("--lng and --lat must be given together; keeping the configured target");
    }
    if let Some(distance) = args.distance {
        view.distance = distance;
    }
    if let Some(pitch) = args.pitch {
        view.orientation[0] = pitch;
    }

    let fetcher = HttpFetcher::with_timeout(Duration::from_millis(config.fetch_timeout_ms))?;
    let frame_interval = Duration::from_millis(args.frame_ms.max(1));
    let mut engine = Engine::new(
        config,
        Arc::new(fetcher),
        Handle::current(),
        frame_interval.as_secs_f64(),
    )?;

    info!(
        imagery = %engine.config().imagery.url,
        terrain = %engine.config().terrain.url,
        lng = view.target.lng,
        lat = view.target.lat,
        distance = view.distance,
        "tilewalk starting"
    );

    let mut ticker = tokio::time::interval(frame_interval);
    for _ in 0..args.frames {
        ticker.tick().await;
        let report = engine.run_frame(&view)?;

        if args.report_every > 0 && report.frame % args.report_every == 0 {
            let viewport = engine.viewport(&view)?;
            let centre = viewport.screen() * 0.5;
            let ground = engine.pick(&viewport, centre).map(|p| {
                let ll = mercator_to_lng_lat(p.truncate());
                format!("{:.5},{:.5} @ {:.1} m", ll.lng, ll.lat, p.z)
            });
            info!(
                frame = report.frame,
                visible = report.visible,
                drawn = report.drawn,
                downsampled = report.downsampled,
                deepest_z = report.deepest_z,
                uploaded = report.uploaded,
                ground = ground.as_deref().unwrap_or("-"),
                "frame report"
            );
        }

        view.orientation[1] = (view.orientation[1] + args.orbit).rem_euclid(360.0);
    }

    info!(imagery = %engine.imagery_metrics(), "imagery metrics");
    info!(terrain = %engine.terrain_metrics(), "terrain metrics");
    Ok(())
}
