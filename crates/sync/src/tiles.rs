//! IIIF tile stitcher: fetches a grid of tile images and assembles them
//! into a single JPEG, backing the in-progress canvas with `memmap2` over a
//! truncated temp file once it grows past the configured RAM cap.

use std::fs::OpenOptions;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use image::{ExtendedColorType, GenericImageView, ImageEncoder};
use memmap2::MmapMut;

use crate::error::{FetchError, TileStitchError};
use crate::http_client::HttpClient;

const MAX_RETRIES_PER_TILE: u32 = 3;
const THROTTLE_BASE_WAIT: Duration = Duration::from_secs(2);

struct TilePlan {
    base_url: String,
    full_width: u32,
    full_height: u32,
    tile_width: u32,
    tile_height: u32,
}

/// Extracts `(tile_width, tile_height)` from `info.tiles[0]`, defaulting
/// height to width when absent.
fn pick_tile_spec(info: &serde_json::Value) -> Option<(u32, u32)> {
    let tiles = info.get("tiles")?;
    let spec = match tiles {
        serde_json::Value::Array(list) => list.first()?,
        serde_json::Value::Object(_) => tiles,
        _ => return None,
    };
    let tile_w = spec.get("width")?.as_u64()? as u32;
    if tile_w == 0 {
        return None;
    }
    let tile_h = spec.get("height").and_then(|v| v.as_u64()).map(|v| v as u32).unwrap_or(tile_w);
    Some((tile_w, tile_h))
}

fn build_tile_plan(info: &serde_json::Value, base_url: &str) -> Option<TilePlan> {
    let full_width = info.get("width")?.as_u64()? as u32;
    let full_height = info.get("height")?.as_u64()? as u32;
    if full_width == 0 || full_height == 0 {
        return None;
    }
    let (tile_width, tile_height) = pick_tile_spec(info)?;
    Some(TilePlan {
        base_url: base_url.trim_end_matches('/').to_string(),
        full_width,
        full_height,
        tile_width,
        tile_height,
    })
}

fn tile_regions(plan: &TilePlan) -> Vec<(u32, u32, u32, u32)> {
    let mut regions = Vec::new();
    let mut y = 0;
    while y < plan.full_height {
        let h = plan.tile_height.min(plan.full_height - y);
        let mut x = 0;
        while x < plan.full_width {
            let w = plan.tile_width.min(plan.full_width - x);
            regions.push((x, y, w, h));
            x += plan.tile_width;
        }
        y += plan.tile_height;
    }
    regions
}

enum Canvas {
    Ram(Vec<u8>),
    Mmap { map: MmapMut, path: PathBuf },
}

impl Canvas {
    fn write_row(&mut self, offset: usize, bytes: &[u8]) {
        match self {
            Canvas::Ram(buffer) => buffer[offset..offset + bytes.len()].copy_from_slice(bytes),
            Canvas::Mmap { map, .. } => map[offset..offset + bytes.len()].copy_from_slice(bytes),
        }
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            Canvas::Ram(buffer) => buffer,
            Canvas::Mmap { map, .. } => map,
        }
    }
}

impl Drop for Canvas {
    fn drop(&mut self) {
        if let Canvas::Mmap { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn allocate_canvas(
    out_width: u32,
    out_height: u32,
    max_ram_bytes: u64,
    scratch_path: &Path,
) -> Result<Canvas, TileStitchError> {
    let byte_len = out_width as u64 * out_height as u64 * 3;
    if byte_len <= max_ram_bytes {
        return Ok(Canvas::Ram(vec![255u8; byte_len as usize]));
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(scratch_path)
        .map_err(|source| TileStitchError::MmapCanvas {
            path: scratch_path.to_path_buf(),
            source,
        })?;
    file.set_len(byte_len).map_err(|source| TileStitchError::MmapCanvas {
        path: scratch_path.to_path_buf(),
        source,
    })?;
    let map = unsafe { MmapMut::map_mut(&file) }.map_err(|source| TileStitchError::MmapCanvas {
        path: scratch_path.to_path_buf(),
        source,
    })?;
    Ok(Canvas::Mmap {
        map,
        path: scratch_path.to_path_buf(),
    })
}

/// Fetches one tile region with retry/backoff on 429.
fn fetch_tile(
    client: &HttpClient,
    base_url: &str,
    region: (u32, u32, u32, u32),
    quality: &str,
    timeout: Duration,
) -> Result<Vec<u8>, TileStitchError> {
    let (x, y, w, h) = region;
    let url = format!("{base_url}/{x},{y},{w},{h}/{w},/0/{quality}.jpg");

    for attempt in 0..MAX_RETRIES_PER_TILE {
        match client.get(&url, timeout) {
            Ok(response) if response.is_success() => return Ok(response.body),
            Ok(response) if response.status == 429 => {
                thread::sleep(THROTTLE_BASE_WAIT * 2u32.pow(attempt));
            }
            Ok(_) => {}
            Err(FetchError::Transport { .. }) => {}
            Err(other) => return Err(other.into()),
        }
    }

    Err(TileStitchError::TileFailed {
        x,
        y,
        attempts: MAX_RETRIES_PER_TILE,
    })
}

/// Downloads and stitches every tile of `base_url` into a JPEG at
/// `out_path`, returning `(width, height)` on success.
/// Never leaves a partial JPEG behind on failure.
#[allow(clippy::too_many_arguments)]
pub fn stitch_to_jpeg(
    client: &HttpClient,
    base_url: &str,
    out_path: &Path,
    iiif_quality: &str,
    jpeg_quality: u8,
    max_ram_bytes: u64,
    timeout: Duration,
) -> Result<(u32, u32), TileStitchError> {
    let info_url = format!("{}/info.json", base_url.trim_end_matches('/'));
    let info = client
        .get_json(&info_url, timeout)
        .map_err(|_| TileStitchError::InfoMissing { url: info_url.clone() })?;

    let plan = build_tile_plan(&info, base_url)
        .ok_or_else(|| TileStitchError::InvalidDimensions { url: info_url.clone() })?;

    let scratch_path = out_path.with_extension("stitch.raw");
    let mut canvas = allocate_canvas(plan.full_width, plan.full_height, max_ram_bytes, &scratch_path)?;

    for region in tile_regions(&plan) {
        let (x, y, w, h) = region;
        let tile_bytes = fetch_tile(client, &plan.base_url, region, iiif_quality, timeout)?;
        let decoded = image::load_from_memory(&tile_bytes)?;
        let rgb = if decoded.dimensions() != (w, h) {
            decoded
                .resize_exact(w, h, image::imageops::FilterType::Triangle)
                .to_rgb8()
        } else {
            decoded.to_rgb8()
        };

        let row_stride = w as usize * 3;
        for row in 0..h {
            let src_off = row as usize * row_stride;
            let dst_off = ((y + row) as usize * plan.full_width as usize + x as usize) * 3;
            canvas.write_row(dst_off, &rgb.as_raw()[src_off..src_off + row_stride]);
        }
    }

    let tmp_path = out_path.with_extension("jpg.tmp");
    let mut encoded = Vec::new();
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(Cursor::new(&mut encoded), jpeg_quality);
    encoder
        .write_image(canvas.as_bytes(), plan.full_width, plan.full_height, ExtendedColorType::Rgb8)
        .map_err(TileStitchError::Image)?;
    std::fs::write(&tmp_path, &encoded)?;
    std::fs::rename(&tmp_path, out_path)?;

    Ok((plan.full_width, plan.full_height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tile_spec_defaults_height_to_width() {
        let info = json!({"width": 100, "height": 80, "tiles": [{"width": 512}]});
        assert_eq!(pick_tile_spec(&info), Some((512, 512)));
    }

    #[test]
    fn rejects_zero_tile_width() {
        let info = json!({"width": 100, "height": 80, "tiles": [{"width": 0}]});
        assert_eq!(pick_tile_spec(&info), None);
    }

    #[test]
    fn builds_plan_from_info_json() {
        let info = json!({"width": 3000, "height": 2000, "tiles": [{"width": 1000, "height": 1000}]});
        let plan = build_tile_plan(&info, "https://example.org/iiif/1").unwrap();
        assert_eq!(plan.full_width, 3000);
        assert_eq!(plan.tile_height, 1000);
    }

    #[test]
    fn tile_regions_cover_full_canvas_with_partial_edges() {
        let plan = TilePlan {
            base_url: "https://x".into(),
            full_width: 2500,
            full_height: 1000,
            tile_width: 1000,
            tile_height: 1000,
        };
        let regions = tile_regions(&plan);
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[2], (2000, 0, 500, 1000));
    }

    #[test]
    fn missing_width_rejects_plan() {
        let info = json!({"height": 80, "tiles": [{"width": 256}]});
        assert!(build_tile_plan(&info, "https://x").is_none());
    }
}
