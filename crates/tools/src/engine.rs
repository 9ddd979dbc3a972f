use std::sync::Arc;

use foundation::TileCoord;
use glam::{DVec2, DVec3};
use runtime::{Frame, FrameBudget, Metrics};
use scene::{
    PickOptions, TileShapeProvider, View, Viewport, ViewportError, VisibilityQuadtree, pick_ground,
};
use streaming::{
    CpuTile, CpuUploader, ElevationSampler, TileCache, TileDownsampler, TileFetcher, TileResource,
    TileSource,
};
use tokio::runtime::Handle;
use tracing::debug;

use crate::config::{ConfigError, EngineConfig};

/// What one frame did.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FrameReport {
    pub frame: u64,
    /// Tiles selected by the quadtree.
    pub visible: usize,
    /// Visible tiles drawn from a resident imagery tile (native or ancestor).
    pub drawn: usize,
    /// Drawn tiles that used an ancestor.
    pub downsampled: usize,
    /// Deepest zoom among the visible tiles.
    pub deepest_z: u8,
    /// Imagery tiles that finished loading during this frame.
    pub uploaded: usize,
}

/// Owns every cache and runs the per-frame tile update.
pub struct Engine {
    config: EngineConfig,
    frame: Frame,
    imagery: TileCache<CpuTile>,
    imagery_levels: TileDownsampler,
    shapes: TileShapeProvider<ElevationSampler<CpuTile>>,
    quadtree: VisibilityQuadtree,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        fetcher: Arc<dyn TileFetcher>,
        runtime: Handle,
        frame_dt_s: f64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let imagery = TileCache::new(
            TileSource {
                name: "imagery",
                template: config.imagery.template("imagery")?,
                fetcher: Arc::clone(&fetcher),
                uploader: Box::new(CpuUploader),
            },
            config.imagery.cache,
            runtime.clone(),
        );
        let terrain = TileCache::new(
            TileSource {
                name: "terrain",
                template: config.terrain.template("terrain")?,
                fetcher,
                uploader: Box::new(CpuUploader),
            },
            config.terrain.cache,
            runtime,
        );
        let elevation = ElevationSampler::new(terrain, config.terrain.levels)
            .with_default_zoom(config.elevation_zoom);

        Ok(Self {
            imagery,
            imagery_levels: config.imagery.levels,
            shapes: TileShapeProvider::new(elevation, config.shapes),
            quadtree: VisibilityQuadtree::new(config.quadtree),
            frame: Frame::first(frame_dt_s),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn imagery_metrics(&self) -> &Metrics {
        self.imagery.metrics()
    }

    pub fn terrain_metrics(&self) -> &Metrics {
        self.shapes.ground().tiles().metrics()
    }

    /// Realise `view`, pushed back to the configured minimum distance.
    pub fn viewport(&self, view: &View) -> Result<Viewport, ViewportError> {
        let mut view = view.clone();
        view.clamp_distance(self.config.min_distance_m);
        Viewport::new(&view)
    }

    /// One display frame: cache maintenance, shape resolution, tile
    /// selection and imagery binding.
    pub fn run_frame(&mut self, view: &View) -> Result<FrameReport, ViewportError> {
        let viewport = self.viewport(view)?;

        let uploaded = self.imagery.begin_frame();
        self.shapes.ground_mut().begin_frame();
        self.shapes.purge_stale();
        self.shapes
            .resolve_pending(&mut FrameBudget::new(self.config.shapes.max_resolves_per_frame));

        let tiles = self.quadtree.visible_tiles(&viewport, &mut self.shapes);
        let mut report = FrameReport {
            frame: self.frame.index,
            visible: tiles.len(),
            deepest_z: tiles.iter().map(|t| t.z).max().unwrap_or(0),
            uploaded,
            ..FrameReport::default()
        };

        for (unit, coord) in tiles.into_iter().enumerate() {
            let Some(hit) = self.imagery_levels.get(&mut self.imagery, coord) else {
                continue;
            };
            hit.resource.bind(unit as u32);
            report.drawn += 1;
            if hit.downsample > 0 {
                report.downsampled += 1;
            }
        }

        debug!(
            frame = report.frame,
            visible = report.visible,
            drawn = report.drawn,
            downsampled = report.downsampled,
            deepest_z = report.deepest_z,
            "frame"
        );
        self.frame = self.frame.next();
        Ok(report)
    }

    /// Ground point under pixel `px`.
    pub fn pick(&mut self, viewport: &Viewport, px: DVec2) -> Option<DVec3> {
        pick_ground(viewport, px, self.shapes.ground_mut(), PickOptions::default())
    }

    /// Whether the imagery tile itself (not an ancestor) is resident.
    pub fn has_imagery(&self, coord: TileCoord) -> bool {
        self.imagery.has(coord)
    }
}
