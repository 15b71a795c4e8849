/*
 *  artwork/mod.rs
 *
 *  PanelBus - live values, no chatter
 *	(c) 2025-26 Stuart Hunter
 *
 *	Album art: request queue, single worker and one-slot decoded cache
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
pub mod fetch;
pub mod jpeg;
pub mod proxy;

use log::{debug, error, info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use crate::event::{BusError, EventBus};
use crate::update::{ImageBuffer, ImageHandle, PresentationUpdate};

pub use fetch::{HttpImageFetch, ImageFetch};
pub use jpeg::DecodedImage;

/// Requests waiting for the worker. Further requests are dropped.
pub const QUEUE_CAPACITY: usize = 5;
pub const MAX_URL_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum ArtError {
    #[error("invalid cover url: {0}")]
    InvalidUrl(String),
    #[error("cover url is {0} bytes, limit is 512")]
    UrlTooLong(usize),
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("image proxy returned status {0}")]
    Status(u16),
    #[error("image proxy returned no data")]
    Empty,
    #[error("image of {0} bytes exceeds download limit")]
    TooLarge(usize),
    #[error("not a JPEG: {0}")]
    NotJpeg(&'static str),
    #[error("JPEG decode failed: {0}")]
    Decode(String),
    #[error("out of memory reserving {0} bytes")]
    Exhausted(usize),
    #[error("album art worker is not running")]
    WorkerGone,
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// One cover request, copied by value into the worker queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumArtRequest {
    pub url: String,
    pub width: u16,
    pub height: u16,
    pub is_background: bool,
}

impl AlbumArtRequest {
    pub fn new(url: &str, width: u16, height: u16, is_background: bool) -> Result<Self, ArtError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ArtError::InvalidUrl(String::new()));
        }
        if url.len() > MAX_URL_LEN {
            return Err(ArtError::UrlTooLong(url.len()));
        }
        Ok(Self { url: url.to_string(), width, height, is_background })
    }
}

/// What became of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    CacheHit,
    Enqueued,
    Dropped,
    Published,
}

#[derive(Debug, Default)]
struct CacheSlot {
    url: String,
    image: Option<ImageHandle>,
    in_use: bool,
    generation: u64,
}

/// The single decoded-image slot, keyed by source URL. The key and the
/// buffer only ever change together, under one lock.
#[derive(Debug, Clone, Default)]
pub struct ArtCache {
    slot: Arc<Mutex<CacheSlot>>,
}

impl ArtCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `url` from the slot. On a hit the update is posted while the
    /// lock is held so it cannot race a concurrent install.
    async fn serve_hit(&self, url: &str, bus: &EventBus) -> Result<bool, ArtError> {
        let mut slot = self.slot.lock().await;
        if slot.url != url {
            return Ok(false);
        }
        let Some(image) = slot.image.clone() else {
            return Ok(false);
        };
        slot.in_use = true;
        info!("album art cache hit for {}", url);
        bus.post_update(PresentationUpdate::AlbumArt(image)).await?;
        Ok(true)
    }

    /// Install a freshly decoded image as current and publish it. The
    /// previous buffer stays alive for as long as anyone still holds it.
    async fn install(&self, url: &str, decoded: DecodedImage, bus: &EventBus) -> Result<ImageHandle, ArtError> {
        let mut slot = self.slot.lock().await;
        let generation = slot.generation + 1;
        let image = Arc::new(ImageBuffer {
            width: decoded.width,
            height: decoded.height,
            generation,
            pixels: decoded.pixels,
        });

        let previous = slot.image.replace(Arc::clone(&image));
        let previous_url = std::mem::replace(&mut slot.url, url.to_string());
        slot.generation = generation;
        slot.in_use = true;

        if let Err(e) = bus.post_update(PresentationUpdate::AlbumArt(Arc::clone(&image))).await {
            // put the old entry back, the new one was never seen
            slot.image = previous;
            slot.url = previous_url;
            slot.generation = generation - 1;
            slot.in_use = slot.image.is_some();
            return Err(e.into());
        }
        drop(slot);

        if let Some(old) = previous {
            match Arc::strong_count(&old) {
                1 => debug!("released album art generation {}", old.generation),
                n => debug!("album art generation {} still held by {} readers", old.generation, n - 1),
            }
        }
        Ok(image)
    }

    /// Current buffer, if any.
    pub async fn current(&self) -> Option<ImageHandle> {
        self.slot.lock().await.image.clone()
    }

    pub async fn current_url(&self) -> String {
        self.slot.lock().await.url.clone()
    }

    pub async fn generation(&self) -> u64 {
        self.slot.lock().await.generation
    }

    pub async fn in_use(&self) -> bool {
        self.slot.lock().await.in_use
    }
}

/// Front door of the pipeline, shared by every producer.
#[derive(Debug, Clone)]
pub struct ArtRequester {
    cache: ArtCache,
    queue: mpsc::Sender<AlbumArtRequest>,
    bus: EventBus,
}

impl ArtRequester {
    /// Answer from the cache when possible, otherwise hand the request to
    /// the worker. A full queue drops the request; callers re-request.
    pub async fn request(&self, request: AlbumArtRequest) -> Result<RequestOutcome, ArtError> {
        if self.cache.serve_hit(&request.url, &self.bus).await? {
            return Ok(RequestOutcome::CacheHit);
        }
        match self.queue.try_send(request) {
            Ok(()) => {
                debug!("album art request queued");
                Ok(RequestOutcome::Enqueued)
            }
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("album art queue full, dropping request for {}", dropped.url);
                Ok(RequestOutcome::Dropped)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ArtError::WorkerGone),
        }
    }

    pub fn cache(&self) -> &ArtCache {
        &self.cache
    }
}

/// The one task allowed to download and decode.
pub struct ArtWorker<F: ImageFetch> {
    rx: mpsc::Receiver<AlbumArtRequest>,
    cache: ArtCache,
    bus: EventBus,
    fetcher: F,
    proxy_base: String,
}

/// Build a connected requester/worker pair around a fresh cache.
pub fn pipeline<F: ImageFetch>(
    bus: EventBus,
    fetcher: F,
    proxy_base: &str,
    capacity: usize,
) -> (ArtRequester, ArtWorker<F>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cache = ArtCache::new();
    let requester = ArtRequester { cache: cache.clone(), queue: tx, bus: bus.clone() };
    let worker = ArtWorker { rx, cache, bus, fetcher, proxy_base: proxy_base.to_string() };
    (requester, worker)
}

impl<F: ImageFetch> ArtWorker<F> {
    /// Drain requests one at a time until every requester is gone.
    pub async fn run(mut self) {
        info!("album art worker started");
        while let Some(request) = self.rx.recv().await {
            match self.process(request).await {
                Ok(outcome) => debug!("album art request finished: {:?}", outcome),
                Err(e) => error!("album art request failed: {}", e),
            }
        }
        info!("album art worker exiting, queue closed");
    }

    /// Download, validate, decode and publish one request. Failures leave the
    /// cache slot as it was.
    pub async fn process(&mut self, request: AlbumArtRequest) -> Result<RequestOutcome, ArtError> {
        // an earlier queued request may already have installed this url
        if self.cache.serve_hit(&request.url, &self.bus).await? {
            return Ok(RequestOutcome::CacheHit);
        }

        let url = proxy::convert_url(&self.proxy_base, &request.url, request.width, request.height)?;
        info!("downloading album art from {}", url);
        let bytes = self.fetcher.fetch(&url).await?;

        let (w, h) = jpeg::probe_dimensions(&bytes)?;
        debug!("album art header ok, {}x{} source, {} bytes", w, h, bytes.len());

        let (width, height) = (request.width, request.height);
        let decoded = tokio::task::spawn_blocking(move || jpeg::decode_rgb565(&bytes, width, height))
            .await
            .map_err(|e| ArtError::Decode(e.to_string()))??;
        info!("album art decoded to {}x{}", decoded.width, decoded.height);

        self.cache.install(&request.url, decoded, &self.bus).await?;
        Ok(RequestOutcome::Published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Payload, PresentationEvents};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct FakeFetch {
        calls: Arc<AtomicUsize>,
        urls: Arc<StdMutex<Vec<String>>>,
        body: Arc<Vec<u8>>,
    }

    impl FakeFetch {
        fn serving(body: Vec<u8>) -> Self {
            Self { body: Arc::new(body), ..Default::default() }
        }
    }

    impl ImageFetch for FakeFetch {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, ArtError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            if self.body.is_empty() {
                return Err(ArtError::Empty);
            }
            Ok(self.body.as_ref().clone())
        }
    }

    fn next_image(pres: &mut PresentationEvents) -> ImageHandle {
        match pres.try_receive_presentation().map(|e| e.payload) {
            Some(Payload::Update(PresentationUpdate::AlbumArt(img))) => img,
            other => panic!("expected album art update, got {:?}", other),
        }
    }

    #[test]
    fn test_request_validation() {
        assert!(matches!(AlbumArtRequest::new("  ", 100, 100, false), Err(ArtError::InvalidUrl(_))));
        let long = format!("http://h/{}", "x".repeat(600));
        assert!(matches!(AlbumArtRequest::new(&long, 100, 100, false), Err(ArtError::UrlTooLong(_))));
        let ok = AlbumArtRequest::new("http://h/a.jpg", 100, 100, true).unwrap();
        assert!(ok.is_background);
    }

    #[tokio::test]
    async fn test_repeat_url_is_single_flight() {
        let (bus, _sys, mut pres) = EventBus::new(10);
        let fetch = FakeFetch::serving(jpeg::tests::grey_jpeg(2));
        let (requester, mut worker) = pipeline(bus, fetch.clone(), "http://proxy", QUEUE_CAPACITY);

        let req = AlbumArtRequest::new("http://nas/music/a.jpg", 100, 100, false).unwrap();
        assert_eq!(requester.request(req.clone()).await.unwrap(), RequestOutcome::Enqueued);
        let queued = worker.rx.recv().await.unwrap();
        assert_eq!(worker.process(queued).await.unwrap(), RequestOutcome::Published);
        let first = next_image(&mut pres);

        assert_eq!(requester.request(req).await.unwrap(), RequestOutcome::CacheHit);
        let second = next_image(&mut pres);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fetch.urls.lock().unwrap()[0],
            "http://proxy/convert_music_image.php?music_path=music/a.jpg&format=jpg&width=100&height=100"
        );
        assert!(requester.cache().in_use().await);
    }

    #[tokio::test]
    async fn test_duplicate_queued_requests_download_once() {
        let (bus, _sys, mut pres) = EventBus::new(10);
        let fetch = FakeFetch::serving(jpeg::tests::grey_jpeg(1));
        let (requester, mut worker) = pipeline(bus, fetch.clone(), "http://proxy", QUEUE_CAPACITY);

        let req = AlbumArtRequest::new("http://nas/b.jpg", 8, 8, false).unwrap();
        assert_eq!(requester.request(req.clone()).await.unwrap(), RequestOutcome::Enqueued);
        assert_eq!(requester.request(req).await.unwrap(), RequestOutcome::Enqueued);

        let first = worker.rx.recv().await.unwrap();
        let second = worker.rx.recv().await.unwrap();
        assert_eq!(worker.process(first).await.unwrap(), RequestOutcome::Published);
        assert_eq!(worker.process(second).await.unwrap(), RequestOutcome::CacheHit);
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);
        let a = next_image(&mut pres);
        let b = next_image(&mut pres);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_sixth_request_dropped() {
        let (bus, _sys, mut pres) = EventBus::new(10);
        let fetch = FakeFetch::serving(jpeg::tests::grey_jpeg(1));
        let (requester, mut worker) = pipeline(bus, fetch.clone(), "http://proxy", QUEUE_CAPACITY);

        for i in 0..5 {
            let req = AlbumArtRequest::new(&format!("http://nas/{}.jpg", i), 8, 8, false).unwrap();
            assert_eq!(requester.request(req).await.unwrap(), RequestOutcome::Enqueued);
        }
        let sixth = AlbumArtRequest::new("http://nas/5.jpg", 8, 8, false).unwrap();
        assert_eq!(requester.request(sixth).await.unwrap(), RequestOutcome::Dropped);

        // the worker drains the five in the order they were submitted
        for i in 0..5u64 {
            let req = worker.rx.recv().await.unwrap();
            assert_eq!(worker.process(req).await.unwrap(), RequestOutcome::Published);
            assert_eq!(next_image(&mut pres).generation, i + 1);
        }
        assert!(worker.rx.try_recv().is_err());
        assert!(pres.try_receive_presentation().is_none());

        let fetched: Vec<String> = fetch.urls.lock().unwrap().clone();
        let expected: Vec<String> = (0..5)
            .map(|i| format!("http://proxy/convert_music_image.php?music_path={}.jpg&format=jpg&width=8&height=8", i))
            .collect();
        assert_eq!(fetched, expected);
        assert_eq!(requester.cache().current_url().await, "http://nas/4.jpg");
    }

    #[tokio::test]
    async fn test_bad_image_leaves_cache_untouched() {
        let (bus, _sys, mut pres) = EventBus::new(10);
        let good = FakeFetch::serving(jpeg::tests::grey_jpeg(1));
        let (requester, mut worker) = pipeline(bus.clone(), good, "http://proxy", QUEUE_CAPACITY);

        let req = AlbumArtRequest::new("http://nas/good.jpg", 8, 8, false).unwrap();
        worker.process(req).await.unwrap();
        let installed = next_image(&mut pres);
        assert_eq!(installed.generation, 1);

        worker.fetcher = FakeFetch::serving(b"<html>not an image</html>".to_vec());
        let bad = AlbumArtRequest::new("http://nas/bad.jpg", 8, 8, false).unwrap();
        assert!(matches!(worker.process(bad).await, Err(ArtError::NotJpeg(_))));

        worker.fetcher = FakeFetch::default();
        let missing = AlbumArtRequest::new("http://nas/missing.jpg", 8, 8, false).unwrap();
        assert!(matches!(worker.process(missing).await, Err(ArtError::Empty)));

        let cache = requester.cache();
        assert_eq!(cache.current_url().await, "http://nas/good.jpg");
        assert_eq!(cache.generation().await, 1);
        assert!(Arc::ptr_eq(&cache.current().await.unwrap(), &installed));
        assert!(pres.try_receive_presentation().is_none());
    }

    #[tokio::test]
    async fn test_new_image_replaces_previous_safely() {
        let (bus, _sys, mut pres) = EventBus::new(10);
        let (requester, mut worker) =
            pipeline(bus, FakeFetch::serving(jpeg::tests::grey_jpeg(1)), "http://proxy", QUEUE_CAPACITY);

        worker.process(AlbumArtRequest::new("http://nas/one.jpg", 8, 8, false).unwrap()).await.unwrap();
        let held_by_renderer = next_image(&mut pres);

        worker.process(AlbumArtRequest::new("http://nas/two.jpg", 8, 8, false).unwrap()).await.unwrap();
        let newer = next_image(&mut pres);

        // the renderer still owns the first buffer after the swap
        assert_eq!(held_by_renderer.generation, 1);
        assert_eq!(held_by_renderer.pixels.len(), 64);
        assert_eq!(newer.generation, 2);
        assert_eq!(Arc::strong_count(&held_by_renderer), 1);
        assert_eq!(requester.cache().current_url().await, "http://nas/two.jpg");
    }

    #[tokio::test]
    async fn test_worker_runs_queue_in_order() {
        let (bus, _sys, mut pres) = EventBus::new(10);
        let fetch = FakeFetch::serving(jpeg::tests::grey_jpeg(1));
        let (requester, worker) = pipeline(bus, fetch.clone(), "http://proxy", QUEUE_CAPACITY);

        for name in ["a", "b", "c"] {
            let req = AlbumArtRequest::new(&format!("http://nas/{}.jpg", name), 8, 8, false).unwrap();
            requester.request(req).await.unwrap();
        }
        let cache = requester.cache().clone();
        drop(requester);
        worker.run().await;

        let urls = fetch.urls.lock().unwrap().clone();
        assert_eq!(urls.len(), 3);
        assert!(urls[0].contains("music_path=a.jpg"));
        assert!(urls[2].contains("music_path=c.jpg"));
        for generation in 1..=3 {
            assert_eq!(next_image(&mut pres).generation, generation);
        }
        assert_eq!(cache.current_url().await, "http://nas/c.jpg");
    }
}
