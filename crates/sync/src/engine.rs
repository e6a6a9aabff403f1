//! Per-document download orchestration: a bounded worker pool fans out
//! per-canvas downloads (`download_page`), with the tile-stitch fallback
//! from `tiles.rs` folded in, and `run` drives a whole document end to end.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde_json::Value;

use crate::catalog::{self, AssetState, CatalogPool, ManuscriptUpsert};
use crate::config::VaultConfig;
use crate::enrichment::{self, EnrichedMetadata};
use crate::environment::Environment;
use crate::http_client::HttpClient;
use crate::manifest::{parse_manifest, Canvas, ParsedManifest};
use crate::progress::{CancelCheck, ProgressCallback, ProgressUpdate};
use crate::throttle::Backoff;
use crate::tiles;

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 5;
const HIGH_RESOLUTION_WIDTH_THRESHOLD: u32 = 2500;
const STITCH_PERMIT_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    High,
    Medium,
}

impl Resolution {
    fn as_str(self) -> &'static str {
        match self {
            Resolution::High => "high",
            Resolution::Medium => "medium",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageStats {
    pub width: u32,
    pub height: u32,
    pub resolution: Resolution,
    pub via_tile_stitch: bool,
    pub origin_url: String,
}

/// One in-flight stitch at a time per engine instance. A document's own engine owns this permit;
/// concurrent documents each get their own `Engine` and do not share it.
struct StitchPermit {
    busy: Mutex<bool>,
}

impl StitchPermit {
    fn new() -> Self {
        Self { busy: Mutex::new(false) }
    }

    fn try_acquire(&self, wait: Duration) -> bool {
        let deadline = std::time::Instant::now() + wait;
        loop {
            {
                let mut busy = self.busy.lock();
                if !*busy {
                    *busy = true;
                    return true;
                }
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    fn release(&self) {
        *self.busy.lock() = false;
    }
}

/// Owns everything one document download needs: the HTTP client, the
/// per-document backoff clock, and the single tile-stitch permit.
pub struct Engine {
    client: Arc<HttpClient>,
    catalog: CatalogPool,
    config: VaultConfig,
    backoff: Backoff,
    stitch_permit: StitchPermit,
}

impl Engine {
    pub fn new(client: Arc<HttpClient>, catalog: CatalogPool, config: VaultConfig) -> Self {
        Self {
            client,
            catalog,
            config,
            backoff: Backoff::default(),
            stitch_permit: StitchPermit::new(),
        }
    }

    fn attempt_urls(&self, base_url: &str) -> Vec<String> {
        self.config
            .download_strategy
            .iter()
            .map(|size| format!("{}/full/{},/0/{}.jpg", base_url.trim_end_matches('/'), size, self.config.iiif_quality))
            .collect()
    }

    /// `download_page`. Returns `Ok(None)` when
    /// the canvas has no resolvable service and nothing can be done; returns
    /// `Err` only for unexpected local I/O failures, never for exhausted
    /// network retries (those also resolve to `Ok(None)`).
    fn download_page(
        &self,
        canvas: &Canvas,
        manifest_host: &str,
        temp_dir: &Path,
    ) -> anyhow::Result<Option<(PathBuf, PageStats)>> {
        let Some(base_url) = canvas.service_base_url.as_deref() else {
            return Ok(None);
        };

        let dest = temp_dir.join(format!("pag_{:04}.jpg", canvas.index));
        if let Some(stats) = probe_existing(&dest, base_url)? {
            return Ok(Some((dest, stats)));
        }

        let urls = self.attempt_urls(base_url);

        for attempt in 0..MAX_ATTEMPTS {
            self.backoff.wait(manifest_host);

            let mut rate_limited = false;
            for url in &urls {
                match self.client.get(url, ATTEMPT_TIMEOUT) {
                    Ok(response) if response.status == 200 && !response.body.is_empty() => {
                        if let Some(stats) = write_and_probe(&dest, &response.body, base_url)? {
                            return Ok(Some((dest, stats)));
                        }
                    }
                    Ok(response) if response.status == 429 => {
                        self.backoff.trip(attempt);
                        rate_limited = true;
                        break;
                    }
                    _ => continue,
                }
            }
            if rate_limited {
                continue;
            }
        }

        match self.try_tile_stitch(base_url, &dest) {
            Some(stats) => Ok(Some((dest, stats))),
            None => Ok(None),
        }
    }

    fn try_tile_stitch(&self, base_url: &str, dest: &Path) -> Option<PageStats> {
        if !self.stitch_permit.try_acquire(STITCH_PERMIT_WAIT) {
            return None;
        }
        let result = tiles::stitch_to_jpeg(
            &self.client,
            base_url,
            dest,
            &self.config.iiif_quality,
            90,
            self.config.tile_stitch_max_ram_bytes(),
            ATTEMPT_TIMEOUT,
        );
        self.stitch_permit.release();

        match result {
            Ok((width, height)) => Some(PageStats {
                width,
                height,
                resolution: classify_resolution(width),
                via_tile_stitch: true,
                origin_url: base_url.to_string(),
            }),
            Err(error) => {
                tracing::warn!(%error, base_url, "tile-stitch fallback failed");
                None
            }
        }
    }

    /// Whole-document orchestration `run(progress, should_cancel)`. `workers` sizes the bounded pool.
    pub fn run(
        &self,
        env: &Environment,
        doc_id: &str,
        library: &str,
        manifest_url: &str,
        manifest_raw: &Value,
        progress: ProgressCallback,
        should_cancel: CancelCheck,
    ) -> anyhow::Result<()> {
        let document_root = env.document_root(library, doc_id);
        let data_dir = document_root.join("data");
        let scans_dir = document_root.join("scans");
        let temp_dir = env.document_temp_dir(doc_id);
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&scans_dir)?;
        fs::create_dir_all(&temp_dir)?;

        let result = self.run_inner(
            doc_id,
            library,
            manifest_url,
            manifest_raw,
            &data_dir,
            &scans_dir,
            &temp_dir,
            progress,
            should_cancel,
        );

        if let Err(error) = &result {
            if let Err(write_error) = catalog::upsert_manuscript(
                &self.catalog,
                doc_id,
                ManuscriptUpsert {
                    status: Some(AssetState::Error),
                    error_log: Some(&error.to_string()),
                    ..Default::default()
                },
            ) {
                tracing::error!(%write_error, doc_id, "failed to record run failure in catalog");
            }
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_inner(
        &self,
        doc_id: &str,
        library: &str,
        manifest_url: &str,
        manifest_raw: &Value,
        data_dir: &Path,
        scans_dir: &Path,
        temp_dir: &Path,
        progress: ProgressCallback,
        should_cancel: CancelCheck,
    ) -> anyhow::Result<()> {
        fs::write(data_dir.join("manifest.json"), serde_json::to_vec_pretty(manifest_raw)?)?;

        let manifest = parse_manifest(manifest_raw);
        fs::write(data_dir.join("metadata.json"), serde_json::to_vec_pretty(&manifest_summary(&manifest))?)?;

        let total = manifest.canvases.len() as i64;
        let enriched = enrichment::enrich(&manifest, doc_id, library, None);
        upsert_metadata(&self.catalog, doc_id, library, manifest_url, &manifest, &enriched, total, AssetState::Downloading)?;

        let manifest_host = url_host(manifest_url);
        if manifest_host.contains("vatlib.it") {
            self.client.warm_up_vatican(manifest_url, ATTEMPT_TIMEOUT);
        }

        let canvas_count = manifest.canvases.len();
        let mut downloaded: Vec<Option<(PathBuf, PageStats)>> = (0..canvas_count).map(|_| None).collect();

        if canvas_count > 0 {
            let pool = build_pool(self.config.download_workers);
            let (sender, receiver) = crossbeam::channel::unbounded();

            // Every canvas is handed to the pool up front, mirroring the
            // original's eager `executor.submit` for all canvases before the
            // results are drained one at a time; a cancellation observed
            // while draining stops the drain loop but does not reach back
            // into the pool to abort canvases already in flight.
            let cancelled_at = pool.scope(|scope| {
                for canvas in &manifest.canvases {
                    let sender = sender.clone();
                    let manifest_host = manifest_host.as_str();
                    scope.spawn(move |_| {
                        let outcome = self.download_page(canvas, manifest_host, temp_dir);
                        let _ = sender.send((canvas.index, outcome));
                    });
                }
                drop(sender);

                let mut cancelled_at = None;
                for (index, outcome) in receiver.iter() {
                    if let Ok(Some(result)) = outcome {
                        downloaded[index] = Some(result);
                    }
                    let completed = downloaded.iter().filter(|slot| slot.is_some()).count();
                    progress(ProgressUpdate::new(completed, canvas_count));

                    if should_cancel() {
                        cancelled_at = Some(completed);
                        break;
                    }
                }
                cancelled_at
            });

            if let Some(completed) = cancelled_at {
                catalog::upsert_manuscript(
                    &self.catalog,
                    doc_id,
                    ManuscriptUpsert {
                        status: Some(AssetState::from_counts(completed as i64, total)),
                        downloaded_canvases: Some(completed as i64),
                        missing_pages_json: missing_pages_json(&downloaded).as_deref(),
                        ..Default::default()
                    },
                )?;
                return Ok(());
            }
        }

        let mut finalized = Vec::new();
        for (index, slot) in downloaded.into_iter().enumerate() {
            if let Some((temp_path, stats)) = slot {
                let final_path = scans_dir.join(format!("pag_{index:04}.jpg"));
                if !final_path.exists() {
                    fs::rename(&temp_path, &final_path)?;
                }
                finalized.push((index, final_path, stats));
            }
        }

        fs::write(data_dir.join("image_stats.json"), serde_json::to_vec_pretty(&image_stats_json(doc_id, &finalized))?)?;

        catalog::upsert_manuscript(
            &self.catalog,
            doc_id,
            ManuscriptUpsert {
                status: Some(AssetState::Complete),
                downloaded_canvases: Some(finalized.len() as i64),
                local_path: Some(scans_dir.parent().unwrap_or(scans_dir).to_string_lossy().as_ref()),
                ..Default::default()
            },
        )?;

        Ok(())
    }
}

fn build_pool(workers: usize) -> ThreadPool {
    ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .expect("building a bounded rayon pool should not fail under normal OS conditions")
}

fn classify_resolution(width: u32) -> Resolution {
    if width > HIGH_RESOLUTION_WIDTH_THRESHOLD {
        Resolution::High
    } else {
        Resolution::Medium
    }
}

/// Resume check: a nonzero-size file with a valid
/// JPEG header (`FF D8 FF`) is treated as already downloaded.
fn probe_existing(path: &Path, origin_url: &str) -> anyhow::Result<Option<PageStats>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    if bytes.len() < 3 || &bytes[0..3] != [0xFF, 0xD8, 0xFF] {
        return Ok(None);
    }
    match image::load_from_memory(&bytes) {
        Ok(image) => Ok(Some(PageStats {
            width: image.width(),
            height: image.height(),
            resolution: classify_resolution(image.width()),
            via_tile_stitch: false,
            origin_url: origin_url.to_string(),
        })),
        Err(_) => Ok(None),
    }
}

fn write_and_probe(dest: &Path, body: &[u8], origin_url: &str) -> anyhow::Result<Option<PageStats>> {
    fs::write(dest, body)?;
    match image::load_from_memory(body) {
        Ok(image) => Ok(Some(PageStats {
            width: image.width(),
            height: image.height(),
            resolution: classify_resolution(image.width()),
            via_tile_stitch: false,
            origin_url: origin_url.to_string(),
        })),
        Err(_) => {
            let _ = fs::remove_file(dest);
            Ok(None)
        }
    }
}

/// `data/image_stats.json`.
fn image_stats_json(doc_id: &str, finalized: &[(usize, PathBuf, PageStats)]) -> serde_json::Value {
    let pages: Vec<serde_json::Value> = finalized
        .iter()
        .map(|(index, path, stats)| {
            let size_bytes = fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
            serde_json::json!({
                "page_index": index,
                "filename": path.file_name().map(|name| name.to_string_lossy().into_owned()),
                "original_url": stats.origin_url,
                "width": stats.width,
                "height": stats.height,
                "size_bytes": size_bytes,
                "resolution_category": stats.resolution.as_str(),
            })
        })
        .collect();
    serde_json::json!({ "doc_id": doc_id, "pages": pages })
}

/// JSON array of 1-based page numbers with no downloaded file, for the
/// manuscript row's `missing_pages_json` (canvas index 0 is UI page 1).
fn missing_pages_json(downloaded: &[Option<(PathBuf, PageStats)>]) -> Option<String> {
    let missing: Vec<usize> = downloaded
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| slot.is_none().then_some(index + 1))
        .collect();
    if missing.is_empty() {
        None
    } else {
        serde_json::to_string(&missing).ok()
    }
}

fn url_host(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(url)
        .to_string()
}

#[allow(clippy::too_many_arguments)]
fn upsert_metadata(
    catalog: &CatalogPool,
    doc_id: &str,
    library: &str,
    manifest_url: &str,
    manifest: &ParsedManifest,
    enriched: &EnrichedMetadata,
    total_canvases: i64,
    status: AssetState,
) -> anyhow::Result<()> {
    let metadata_json = serde_json::to_string(&manifest.metadata)?;
    catalog::upsert_manuscript(
        catalog,
        doc_id,
        ManuscriptUpsert {
            library: Some(library),
            display_title: manifest.label.as_deref(),
            manifest_url: Some(manifest_url),
            total_canvases: Some(total_canvases),
            status: Some(status),
            item_type: Some(enriched.item_type),
            shelfmark: enriched.shelfmark.as_deref(),
            date_label: enriched.date_label.as_deref(),
            language_label: enriched.language_label.as_deref(),
            source_detail_url: enriched.source_detail_url.as_deref(),
            metadata_json: Some(&metadata_json),
            ..Default::default()
        },
    )?;
    Ok(())
}

fn manifest_summary(manifest: &ParsedManifest) -> serde_json::Value {
    serde_json::json!({
        "label": manifest.label,
        "description": manifest.description,
        "attribution": manifest.attribution,
        "canvas_count": manifest.canvases.len(),
        "metadata": manifest.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_threshold_is_high_above_2500px() {
        assert_eq!(classify_resolution(2501), Resolution::High);
        assert_eq!(classify_resolution(2500), Resolution::Medium);
    }

    #[test]
    fn url_host_strips_scheme_and_path() {
        assert_eq!(url_host("https://digi.vatlib.it/view/MSS_Vat.lat.1"), "digi.vatlib.it");
    }

    #[test]
    fn stitch_permit_blocks_concurrent_acquire() {
        let permit = StitchPermit::new();
        assert!(permit.try_acquire(Duration::from_millis(10)));
        assert!(!permit.try_acquire(Duration::from_millis(10)));
        permit.release();
        assert!(permit.try_acquire(Duration::from_millis(10)));
    }

    #[test]
    fn probe_existing_rejects_non_jpeg_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pag_0000.jpg");
        fs::write(&path, b"not a jpeg").unwrap();
        assert!(probe_existing(&path, "https://example.org/iiif/1").unwrap().is_none());
    }
}
