use std::sync::Arc;

use foundation::{TileCoord, TileKey};
use runtime::{FrameBudget, Metrics};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::fetch::{Completion, TileFetcher, spawn_fetch};
use crate::index_cache::{CacheConfig, TileIndexCache};
use crate::request::Request;
use crate::residency::Residency;
use crate::resource::{TileResource, TileUploader};
use crate::template::UrlTemplate;

/// Tuning for one [`TileCache`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileCacheConfig {
    /// Capacity of the resident tile index.
    pub max_tiles: usize,
    /// Capacity of the in-flight marker index.
    pub max_pending: usize,
    /// A loading tile not requested again within this window is cancelled.
    pub pending_ttl_ms: u64,
    /// New fetches that may start per frame.
    pub max_requests_per_frame: u32,
    /// Completed payloads that may be uploaded per frame.
    pub max_uploads_per_frame: u32,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            max_tiles: 1000,
            max_pending: 1000,
            pending_ttl_ms: 200,
            max_requests_per_frame: 64,
            max_uploads_per_frame: 16,
        }
    }
}

#[derive(Debug)]
struct CacheEntry<R> {
    resource: R,
    residency: Residency,
    request: Request,
}

/// Marker for a fetch that is still in flight. Dropping it from the pending
/// index aborts the task.
#[derive(Debug)]
struct PendingLoad {
    request: Request,
    abort: AbortHandle,
}

/// Everything a cache needs to turn coordinates into payloads.
pub struct TileSource<R> {
    /// Label for logs and metrics ("imagery", "terrain").
    pub name: &'static str,
    pub template: UrlTemplate,
    pub fetcher: Arc<dyn TileFetcher>,
    pub uploader: Box<dyn TileUploader<R>>,
}

/// Per-source cache of GPU-resident tiles.
///
/// Main-thread only. `request` never blocks: a miss allocates a placeholder,
/// spawns the fetch on `runtime` and reports "not yet". Completions come back
/// through a channel and are applied by [`TileCache::pump`].
pub struct TileCache<R: TileResource> {
    name: &'static str,
    template: UrlTemplate,
    fetcher: Arc<dyn TileFetcher>,
    uploader: Box<dyn TileUploader<R>>,
    runtime: Handle,
    config: TileCacheConfig,
    tiles: TileIndexCache<CacheEntry<R>>,
    pending: TileIndexCache<PendingLoad>,
    completions_tx: UnboundedSender<Completion>,
    completions_rx: UnboundedReceiver<Completion>,
    next_request: Request,
    request_budget: FrameBudget,
    metrics: Metrics,
    evictions_reported: u64,
}

impl<R: TileResource + 'static> TileCache<R> {
    pub fn new(source: TileSource<R>, config: TileCacheConfig, runtime: Handle) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let tiles = TileIndexCache::with_dispose(
            CacheConfig::with_max(config.max_tiles),
            |_key, mut entry: CacheEntry<R>| entry.resource.dispose(),
        );
        let pending = TileIndexCache::with_dispose(
            CacheConfig::with_ttl(config.max_pending, config.pending_ttl_ms),
            |_key, load: PendingLoad| load.abort.abort(),
        );

        Self {
            name: source.name,
            template: source.template,
            fetcher: source.fetcher,
            uploader: source.uploader,
            runtime,
            config,
            tiles,
            pending,
            completions_tx,
            completions_rx,
            next_request: Request(1),
            request_budget: FrameBudget::new(config.max_requests_per_frame),
            metrics: Metrics::new(),
            evictions_reported: 0,
        }
    }
}

impl<R: TileResource> TileCache<R> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> TileCacheConfig {
        self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Number of entries, loading or loaded.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Best-effort access: the resource if loaded, otherwise starts (or keeps
    /// alive) its fetch and returns `None`.
    pub fn get(&mut self, coord: TileCoord) -> Option<&R> {
        if self.request(coord) {
            self.peek(coord)
        } else {
            None
        }
    }

    /// Mark `coord` as wanted this frame. Returns `true` iff it is loaded.
    ///
    /// At most one fetch is in flight per coordinate: a repeated request for
    /// a loading tile only refreshes its pending marker.
    pub fn request(&mut self, coord: TileCoord) -> bool {
        let key = coord.key();
        match self.tiles.get(key).map(|e| e.residency) {
            Some(Residency::Loaded) => return true,
            Some(Residency::Loading) => {
                // Refresh the marker's age. A loading entry without a marker
                // failed or expired and is reclaimed by the next sweep.
                let _ = self.pending.get(key);
                return false;
            }
            None => {}
        }

        if !self.request_budget.try_consume(1) {
            self.metrics.inc("tiles.deferred");
            return false;
        }
        self.start_load(coord);
        false
    }

    /// The resource for `coord` if it is loaded. Does not touch recency.
    pub fn peek(&self, coord: TileCoord) -> Option<&R> {
        self.tiles
            .peek(coord.key())
            .filter(|e| e.residency.is_loaded())
            .map(|e| &e.resource)
    }

    pub fn has(&self, coord: TileCoord) -> bool {
        self.peek(coord).is_some()
    }

    pub fn is_loading(&self, coord: TileCoord) -> bool {
        self.tiles
            .peek(coord.key())
            .is_some_and(|e| e.residency == Residency::Loading)
    }

    /// Per-frame maintenance: refill the request budget, reclaim expired
    /// loads, and apply up to `max_uploads_per_frame` completions.
    pub fn begin_frame(&mut self) -> usize {
        self.request_budget.reset();
        self.purge_stale();
        let mut uploads = FrameBudget::new(self.config.max_uploads_per_frame);
        self.pump(&mut uploads)
    }

    /// Cancel fetches whose tile was not requested within the pending TTL and
    /// drop every placeholder that no longer has a fetch behind it.
    pub fn purge_stale(&mut self) {
        let cancelled = self.pending.purge_stale();
        if cancelled > 0 {
            debug!(source = self.name, cancelled, "cancelled stale tile loads");
            self.metrics.add("tiles.cancelled", cancelled as u64);
        }
        self.tiles.purge_stale();

        let orphaned: Vec<TileKey> = self
            .tiles
            .iter()
            .filter(|(key, e)| e.residency == Residency::Loading && !self.pending.has(*key))
            .map(|(key, _)| key)
            .collect();
        for key in orphaned {
            trace!(source = self.name, tile = %key.to_coord(), "reclaim placeholder");
            self.tiles.delete(key);
        }
        self.update_gauges();
    }

    /// Apply finished fetches, one budget unit per completion.
    ///
    /// Returns how many tiles became loaded.
    pub fn pump(&mut self, budget: &mut FrameBudget) -> usize {
        let mut loaded = 0;
        while !budget.is_exhausted() {
            let completion = match self.completions_rx.try_recv() {
                Ok(c) => c,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            };
            budget.try_consume(1);
            if self.apply(completion) {
                loaded += 1;
            }
        }
        self.update_gauges();
        loaded
    }

    /// Drop every tile and abort every fetch.
    pub fn dispose(&mut self) {
        self.pending.clear();
        self.tiles.clear();
        while self.completions_rx.try_recv().is_ok() {}
        self.update_gauges();
    }

    fn start_load(&mut self, coord: TileCoord) {
        let key = coord.key();
        let request = self.next_request;
        self.next_request = request.next();

        let resource = self.uploader.allocate(coord);
        self.tiles.set(
            key,
            CacheEntry {
                resource,
                residency: Residency::Loading,
                request,
            },
        );

        let abort = spawn_fetch(
            &self.runtime,
            Arc::clone(&self.fetcher),
            coord,
            self.template.expand(coord),
            request,
            self.completions_tx.clone(),
        );
        self.pending.set(key, PendingLoad { request, abort });
        self.metrics.inc("tiles.requested");
    }

    fn apply(&mut self, completion: Completion) -> bool {
        let Completion {
            key,
            request,
            result,
        } = completion;
        let coord = key.to_coord();

        if self.pending.peek(key).is_some_and(|p| p.request == request) {
            self.pending.delete(key);
        }

        let Some(entry) = self
            .tiles
            .peek_mut(key)
            .filter(|e| e.request == request && e.residency == Residency::Loading)
        else {
            trace!(source = self.name, tile = %coord, "drop stale completion");
            self.metrics.inc("tiles.stale_completion");
            return false;
        };

        let image = match result {
            Ok(image) => image,
            Err(err) => {
                warn!(source = self.name, tile = %coord, error = %err, "tile fetch failed");
                self.metrics.inc("tiles.failed");
                return false;
            }
        };

        if let Err(err) = self.uploader.upload(&mut entry.resource, &image) {
            warn!(source = self.name, tile = %coord, error = %err, "tile upload failed");
            self.metrics.inc("tiles.failed");
            return false;
        }
        entry.residency = Residency::Loaded;
        self.uploader.on_load(&mut entry.resource);
        self.metrics.inc("tiles.loaded");
        debug!(source = self.name, tile = %coord, "tile loaded");
        true
    }

    fn update_gauges(&mut self) {
        self.metrics.set_gauge("tiles.entries", self.tiles.len() as i64);
        self.metrics.set_gauge("tiles.pending", self.pending.len() as i64);
        let evicted = self.tiles.evicted_count();
        if evicted > self.evictions_reported {
            self.metrics
                .add("tiles.evicted", evicted - self.evictions_reported);
            self.evictions_reported = evicted;
        }
    }
}

impl<R: TileResource> Drop for TileCache<R> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::FutureExt;
    use futures_util::future::{self, BoxFuture};
    use image::{ImageFormat, RgbaImage};
    use tokio::runtime::Handle;

    use super::{TileCache, TileCacheConfig, TileSource};
    use crate::fetch::{FetchError, TileFetcher};
    use crate::resource::{CpuTile, CpuUploader};
    use crate::template::UrlTemplate;

    pub fn png(img: &RgbaImage) -> Bytes {
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        Bytes::from(out)
    }

    /// Serves canned payloads by URL; unknown URLs hang forever.
    #[derive(Default)]
    pub struct FakeFetcher {
        pub payloads: Mutex<BTreeMap<String, Result<Bytes, FetchError>>>,
        pub delays: Mutex<BTreeMap<String, Duration>>,
        pub requested: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn serve(&self, url: &str, payload: Result<Bytes, FetchError>) {
            self.payloads
                .lock()
                .unwrap()
                .insert(url.to_string(), payload);
        }

        /// Like `serve`, but the payload only arrives after `delay`.
        pub fn serve_after(&self, url: &str, delay: Duration, payload: Result<Bytes, FetchError>) {
            self.delays.lock().unwrap().insert(url.to_string(), delay);
            self.serve(url, payload);
        }

        pub fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl TileFetcher for FakeFetcher {
        fn fetch(&self, url: String) -> BoxFuture<'static, Result<Bytes, FetchError>> {
            self.requested.lock().unwrap().push(url.clone());
            let payload = self.payloads.lock().unwrap().get(&url).cloned();
            let delay = self.delays.lock().unwrap().get(&url).copied();
            match (payload, delay) {
                (Some(payload), None) => future::ready(payload).boxed(),
                (Some(payload), Some(delay)) => async move {
                    tokio::time::sleep(delay).await;
                    payload
                }
                .boxed(),
                (None, _) => future::pending().boxed(),
            }
        }
    }

    pub fn cpu_cache(
        fetcher: Arc<FakeFetcher>,
        config: TileCacheConfig,
    ) -> TileCache<CpuTile> {
        let source = TileSource {
            name: "test",
            template: UrlTemplate::parse("mem://{z}/{x}/{y}").unwrap(),
            fetcher,
            uploader: Box::new(CpuUploader),
        };
        TileCache::new(source, config, Handle::current())
    }

    /// Let spawned fetch tasks run to completion, decodes included.
    ///
    /// Sleeping parks the paused runtime, which does not auto-advance while
    /// blocking decodes are still running.
    pub async fn settle() {
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use foundation::TileCoord;
    use image::{Rgba, RgbaImage};
    use runtime::FrameBudget;

    use super::TileCacheConfig;
    use super::test_support::{FakeFetcher, cpu_cache, png, settle};
    use crate::fetch::FetchError;

    fn coord(x: u32, y: u32, z: u8) -> TileCoord {
        TileCoord::new(x, y, z).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn first_get_is_absent_then_loaded() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.serve(
            "mem://2/1/1",
            Ok(png(&RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255])))),
        );
        let mut cache = cpu_cache(Arc::clone(&fetcher), TileCacheConfig::default());
        let c = coord(1, 1, 2);

        assert!(cache.get(c).is_none());
        assert!(cache.is_loading(c));

        settle().await;
        assert_eq!(cache.pump(&mut FrameBudget::unlimited()), 1);

        let tile = cache.get(c).expect("loaded");
        assert_eq!(tile.coord(), c);
        assert!(tile.is_mipmapped());
        assert!(cache.has(c));
        assert_eq!(cache.pending_len(), 0);
        assert_eq!(cache.metrics().counter("tiles.loaded"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_requests_share_one_fetch() {
        let fetcher = Arc::new(FakeFetcher::default());
        let mut cache = cpu_cache(Arc::clone(&fetcher), TileCacheConfig::default());
        let c = coord(0, 0, 1);

        for _ in 0..5 {
            assert!(cache.get(c).is_none());
        }
        settle().await;

        assert_eq!(fetcher.requested(), vec!["mem://1/0/0".to_string()]);
        assert_eq!(cache.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_pending_load_is_cancelled() {
        let fetcher = Arc::new(FakeFetcher::default());
        let mut cache = cpu_cache(Arc::clone(&fetcher), TileCacheConfig::default());
        let c = coord(3, 2, 4);

        assert!(cache.get(c).is_none());
        settle().await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pending_len(), 1);

        tokio::time::advance(Duration::from_millis(250)).await;
        cache.purge_stale();

        assert_eq!(cache.len(), 0);
        assert_eq!(cache.pending_len(), 0);
        assert!(!cache.is_loading(c));
        assert_eq!(cache.metrics().counter("tiles.cancelled"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_load_never_delivers() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.serve_after(
            "mem://4/3/2",
            Duration::from_millis(500),
            Ok(png(&RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255])))),
        );
        let mut cache = cpu_cache(Arc::clone(&fetcher), TileCacheConfig::default());
        let c = coord(3, 2, 4);

        assert!(cache.get(c).is_none());
        settle().await;
        tokio::time::advance(Duration::from_millis(250)).await;
        cache.purge_stale();
        assert_eq!(cache.metrics().counter("tiles.cancelled"), 1);

        // Well past the moment the fetch would have answered.
        tokio::time::advance(Duration::from_millis(300)).await;
        settle().await;
        assert_eq!(cache.pump(&mut FrameBudget::unlimited()), 0);

        assert_eq!(cache.metrics().counter("tiles.stale_completion"), 0);
        assert_eq!(cache.metrics().counter("tiles.loaded"), 0);
        assert!(cache.is_empty());
        assert_eq!(fetcher.requested().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn re_requesting_keeps_a_slow_load_alive() {
        let fetcher = Arc::new(FakeFetcher::default());
        let mut cache = cpu_cache(Arc::clone(&fetcher), TileCacheConfig::default());
        let c = coord(1, 0, 1);

        assert!(cache.get(c).is_none());
        for _ in 0..4 {
            tokio::time::advance(Duration::from_millis(150)).await;
            assert!(cache.get(c).is_none());
            cache.purge_stale();
        }

        assert!(cache.is_loading(c));
        assert_eq!(fetcher.requested().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_is_reclaimed_and_retried_on_next_request() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.serve(
            "mem://0/0/0",
            Err(FetchError::Status {
                url: "mem://0/0/0".to_string(),
                status: 503,
            }),
        );
        let mut cache = cpu_cache(Arc::clone(&fetcher), TileCacheConfig::default());

        assert!(cache.get(TileCoord::ROOT).is_none());
        settle().await;
        assert_eq!(cache.pump(&mut FrameBudget::unlimited()), 0);
        assert_eq!(cache.pending_len(), 0);

        // Still loading-without-marker: no immediate retry.
        assert!(cache.get(TileCoord::ROOT).is_none());
        assert_eq!(fetcher.requested().len(), 1);

        cache.purge_stale();
        assert!(cache.is_empty());

        assert!(cache.get(TileCoord::ROOT).is_none());
        assert_eq!(fetcher.requested().len(), 2);
        assert_eq!(cache.metrics().counter("tiles.failed"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_budget_defers_extra_fetches() {
        let fetcher = Arc::new(FakeFetcher::default());
        let config = TileCacheConfig {
            max_requests_per_frame: 2,
            ..TileCacheConfig::default()
        };
        let mut cache = cpu_cache(Arc::clone(&fetcher), config);

        for x in 0..4 {
            assert!(cache.get(coord(x, 0, 2)).is_none());
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.metrics().counter("tiles.deferred"), 2);

        cache.begin_frame();
        assert!(cache.get(coord(2, 0, 2)).is_none());
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_budget_limits_pump() {
        let fetcher = Arc::new(FakeFetcher::default());
        let img = png(&RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255])));
        for x in 0..3 {
            fetcher.serve(&format!("mem://2/{x}/0"), Ok(img.clone()));
        }
        let mut cache = cpu_cache(Arc::clone(&fetcher), TileCacheConfig::default());
        for x in 0..3 {
            cache.get(coord(x, 0, 2));
        }
        settle().await;

        assert_eq!(cache.pump(&mut FrameBudget::new(2)), 2);
        assert_eq!(cache.pump(&mut FrameBudget::new(2)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lru_pressure_disposes_resources() {
        let fetcher = Arc::new(FakeFetcher::default());
        let img = png(&RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255])));
        for x in 0..3 {
            fetcher.serve(&format!("mem://2/{x}/1"), Ok(img.clone()));
        }
        let config = TileCacheConfig {
            max_tiles: 2,
            ..TileCacheConfig::default()
        };
        let mut cache = cpu_cache(Arc::clone(&fetcher), config);
        for x in 0..3 {
            cache.get(coord(x, 1, 2));
        }
        settle().await;
        cache.pump(&mut FrameBudget::unlimited());

        assert_eq!(cache.len(), 2);
        assert!(!cache.has(coord(0, 1, 2)));
        assert!(cache.has(coord(2, 1, 2)));
        assert_eq!(cache.metrics().counter("tiles.stale_completion"), 1);
        assert_eq!(cache.metrics().counter("tiles.evicted"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_drops_everything() {
        let fetcher = Arc::new(FakeFetcher::default());
        let mut cache = cpu_cache(Arc::clone(&fetcher), TileCacheConfig::default());
        cache.get(coord(0, 0, 3));
        cache.get(coord(1, 0, 3));
        cache.dispose();
        assert!(cache.is_empty());
        assert_eq!(cache.pending_len(), 0);
    }
}
