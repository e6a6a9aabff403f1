//! `manuscripts` table operations.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use rusqlite::{OptionalExtension, params};

use super::{normalize_library_name, AssetState, CatalogPool, Manuscript};
use crate::enrichment::{ItemType, ItemTypeSource};
use crate::error::CatalogError;

fn now() -> String {
    Timestamp::now().to_string()
}

fn parse_item_type(raw: &str) -> ItemType {
    match raw {
        "libro a stampa" => ItemType::LibroAStampa,
        "incunabolo" => ItemType::Incunabolo,
        "periodico" => ItemType::Periodico,
        "musica/spartito" => ItemType::MusicaSpartito,
        "mappa/atlante" => ItemType::MappaAtlante,
        "manoscritto" => ItemType::Manoscritto,
        "miscellanea" => ItemType::Miscellanea,
        _ => ItemType::NonClassificato,
    }
}

fn row_to_manuscript(row: &rusqlite::Row) -> rusqlite::Result<Manuscript> {
    let status_text: String = row.get("status")?;
    let item_type_text: String = row.get("item_type")?;
    let item_type_source_text: String = row.get("item_type_source")?;
    Ok(Manuscript {
        doc_id: row.get("doc_id")?,
        library: row.get("library")?,
        display_title: row.get("display_title")?,
        manifest_url: row.get("manifest_url")?,
        local_path: row.get("local_path")?,
        total_canvases: row.get("total_canvases")?,
        downloaded_canvases: row.get("downloaded_canvases")?,
        status: status_text.parse().unwrap_or(AssetState::Error),
        item_type: parse_item_type(&item_type_text),
        item_type_source: if item_type_source_text == "manual" {
            ItemTypeSource::Manual
        } else {
            ItemTypeSource::Auto
        },
        shelfmark: row.get("shelfmark")?,
        date_label: row.get("date_label")?,
        language_label: row.get("language_label")?,
        source_detail_url: row.get("source_detail_url")?,
        reference_text: row.get("reference_text")?,
        metadata_json: row.get("metadata_json")?,
        missing_pages_json: row.get("missing_pages_json")?,
        updated_at: row.get("updated_at")?,
        error_log: row.get("error_log")?,
    })
}

/// Fields accepted by `upsert_manuscript`. All fields are optional; only `Some` values are written.
#[derive(Debug, Clone, Default)]
pub struct ManuscriptUpsert<'a> {
    pub library: Option<&'a str>,
    pub display_title: Option<&'a str>,
    pub title: Option<&'a str>,
    pub manifest_url: Option<&'a str>,
    pub local_path: Option<&'a str>,
    pub total_canvases: Option<i64>,
    pub downloaded_canvases: Option<i64>,
    pub status: Option<AssetState>,
    pub item_type: Option<ItemType>,
    pub item_type_source: Option<ItemTypeSource>,
    pub shelfmark: Option<&'a str>,
    pub date_label: Option<&'a str>,
    pub language_label: Option<&'a str>,
    pub source_detail_url: Option<&'a str>,
    pub reference_text: Option<&'a str>,
    pub metadata_json: Option<&'a str>,
    pub missing_pages_json: Option<&'a str>,
    pub error_log: Option<&'a str>,
}

/// Inserts or updates a manuscript row, preserving a prior `manual`
/// item-type classification against an incoming `auto` one and normalizing
/// the `Vaticana (BAV)` library-name spelling.
pub fn upsert_manuscript(pool: &CatalogPool, doc_id: &str, fields: ManuscriptUpsert) -> Result<(), CatalogError> {
    let conn = pool.get()?;
    let timestamp = now();

    let existing = conn
        .query_row("SELECT * FROM manuscripts WHERE doc_id = ?1", [doc_id], row_to_manuscript)
        .optional()?;

    let library = fields
        .library
        .map(normalize_library_name)
        .or_else(|| existing.as_ref().map(|m| m.library.clone()))
        .unwrap_or_default();
    let display_title = fields
        .display_title
        .or(fields.title)
        .map(str::to_string)
        .or_else(|| existing.as_ref().map(|m| m.display_title.clone()))
        .unwrap_or_default();
    let manifest_url = fields
        .manifest_url
        .map(str::to_string)
        .or_else(|| existing.as_ref().map(|m| m.manifest_url.clone()))
        .unwrap_or_default();
    let local_path = fields
        .local_path
        .map(str::to_string)
        .or_else(|| existing.as_ref().map(|m| m.local_path.clone()))
        .unwrap_or_default();
    let total_canvases = fields
        .total_canvases
        .or_else(|| existing.as_ref().map(|m| m.total_canvases))
        .unwrap_or(0);
    let downloaded_canvases = fields
        .downloaded_canvases
        .or_else(|| existing.as_ref().map(|m| m.downloaded_canvases))
        .unwrap_or(0);
    let status = fields
        .status
        .or_else(|| existing.as_ref().map(|m| m.status))
        .unwrap_or(AssetState::Saved);

    let (item_type, item_type_source) = match (existing.as_ref(), fields.item_type, fields.item_type_source) {
        (Some(prior), _, _) if prior.item_type_source == ItemTypeSource::Manual
            && fields.item_type_source != Some(ItemTypeSource::Manual) =>
        {
            (prior.item_type, ItemTypeSource::Manual)
        }
        (_, Some(new_type), Some(new_source)) => (new_type, new_source),
        (_, Some(new_type), None) => (new_type, ItemTypeSource::Auto),
        (Some(prior), None, _) => (prior.item_type, prior.item_type_source),
        (None, None, _) => (ItemType::NonClassificato, ItemTypeSource::Auto),
    };

    let shelfmark = fields.shelfmark.map(str::to_string).or_else(|| existing.as_ref().and_then(|m| m.shelfmark.clone()));
    let date_label = fields.date_label.map(str::to_string).or_else(|| existing.as_ref().and_then(|m| m.date_label.clone()));
    let language_label = fields
        .language_label
        .map(str::to_string)
        .or_else(|| existing.as_ref().and_then(|m| m.language_label.clone()));
    let source_detail_url = fields
        .source_detail_url
        .map(str::to_string)
        .or_else(|| existing.as_ref().and_then(|m| m.source_detail_url.clone()));
    let reference_text = fields
        .reference_text
        .map(str::to_string)
        .or_else(|| existing.as_ref().and_then(|m| m.reference_text.clone()));
    let metadata_json = fields
        .metadata_json
        .map(str::to_string)
        .or_else(|| existing.as_ref().and_then(|m| m.metadata_json.clone()));
    let missing_pages_json = fields
        .missing_pages_json
        .map(str::to_string)
        .or_else(|| existing.as_ref().and_then(|m| m.missing_pages_json.clone()));
    let error_log = fields.error_log.map(str::to_string).or_else(|| existing.as_ref().and_then(|m| m.error_log.clone()));

    conn.execute(
        "INSERT INTO manuscripts (doc_id, library, display_title, manifest_url, local_path, total_canvases, downloaded_canvases, status, item_type, item_type_source, shelfmark, date_label, language_label, source_detail_url, reference_text, metadata_json, missing_pages_json, updated_at, error_log)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
         ON CONFLICT(doc_id) DO UPDATE SET
            library = excluded.library,
            display_title = excluded.display_title,
            manifest_url = excluded.manifest_url,
            local_path = excluded.local_path,
            total_canvases = excluded.total_canvases,
            downloaded_canvases = excluded.downloaded_canvases,
            status = excluded.status,
            item_type = excluded.item_type,
            item_type_source = excluded.item_type_source,
            shelfmark = excluded.shelfmark,
            date_label = excluded.date_label,
            language_label = excluded.language_label,
            source_detail_url = excluded.source_detail_url,
            reference_text = excluded.reference_text,
            metadata_json = excluded.metadata_json,
            missing_pages_json = excluded.missing_pages_json,
            updated_at = excluded.updated_at,
            error_log = excluded.error_log",
        params![
            doc_id,
            library,
            display_title,
            manifest_url,
            local_path,
            total_canvases,
            downloaded_canvases,
            status.as_str(),
            item_type.as_str(),
            if item_type_source == ItemTypeSource::Manual { "manual" } else { "auto" },
            shelfmark,
            date_label,
            language_label,
            source_detail_url,
            reference_text,
            metadata_json,
            missing_pages_json,
            timestamp,
            error_log,
        ],
    )?;
    Ok(())
}

pub fn get_manuscript(pool: &CatalogPool, doc_id: &str) -> Result<Option<Manuscript>, CatalogError> {
    let conn = pool.get()?;
    let manuscript = conn
        .query_row("SELECT * FROM manuscripts WHERE doc_id = ?1", [doc_id], row_to_manuscript)
        .optional()?;
    Ok(manuscript)
}

pub fn list_manuscripts(pool: &CatalogPool) -> Result<Vec<Manuscript>, CatalogError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM manuscripts ORDER BY updated_at DESC")?;
    let rows = stmt.query_map([], row_to_manuscript)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Scans `dir` for `pag_NNNN.jpg` files and returns the 1-based page
/// numbers found (file index 0 is UI page 1).
fn scan_page_indices(dir: &Path) -> BTreeSet<usize> {
    let mut found = BTreeSet::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Some(index) = name.strip_prefix("pag_").and_then(|rest| rest.strip_suffix(".jpg")).and_then(|digits| digits.parse::<usize>().ok()) {
            found.insert(index + 1);
        }
    }
    found
}

/// Backfills `asset_state`/`missing_pages_json` for up to `limit` rows by
/// re-scanning each manuscript's `scans/` folder and temp directory on disk.
pub fn normalize_asset_states(pool: &CatalogPool, limit: u32, downloads_dir: &Path, temp_root: &Path) -> Result<usize, CatalogError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT doc_id, library, local_path, total_canvases, downloaded_canvases, status FROM manuscripts LIMIT ?1",
    )?;
    let candidates: Vec<(String, String, String, i64, i64, String)> = stmt
        .query_map([limit], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
        })?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    let mut updated = 0;
    for (doc_id, library, local_path, total, downloaded, status_text) in candidates {
        let currently_active = matches!(
            status_text.as_str(),
            "queued" | "running" | "downloading" | "pending"
        );
        let has_active_job = super::jobs::has_active_job_for(pool, &doc_id, &library)?;

        let effective_status = if currently_active && !has_active_job {
            AssetState::from_counts(downloaded, total).as_str().to_string()
        } else {
            status_text.clone()
        };

        let asset_state = if effective_status == "error" {
            AssetState::Error
        } else if matches!(effective_status.as_str(), "queued" | "downloading") {
            effective_status.parse().unwrap_or(AssetState::Saved)
        } else {
            AssetState::from_counts(downloaded, total)
        };

        let document_root = if local_path.is_empty() {
            downloads_dir.join(&library).join(&doc_id)
        } else {
            PathBuf::from(&local_path)
        };
        let mut found_pages = scan_page_indices(&document_root.join("scans"));
        found_pages.extend(scan_page_indices(&temp_root.join(&doc_id)));

        let missing_pages_json = if total > 0 {
            let missing: Vec<usize> = (1..=total as usize).filter(|page| !found_pages.contains(page)).collect();
            if missing.is_empty() {
                None
            } else {
                serde_json::to_string(&missing).ok()
            }
        } else {
            None
        };

        conn.execute(
            "UPDATE manuscripts SET status = ?2, missing_pages_json = ?3, updated_at = ?4 WHERE doc_id = ?1",
            params![doc_id, asset_state.as_str(), missing_pages_json, now()],
        )?;
        updated += 1;
    }
    Ok(updated)
}

/// Deletes a manuscript's snippet rows, job rows, its row, and its
/// on-disk folder — refusing the filesystem delete if `local_path` is not
/// inside `downloads_dir`.
pub fn delete_manuscript(pool: &CatalogPool, doc_id: &str, downloads_dir: &Path) -> Result<(), CatalogError> {
    let conn = pool.get()?;
    let manuscript = conn
        .query_row("SELECT * FROM manuscripts WHERE doc_id = ?1", [doc_id], row_to_manuscript)
        .optional()?;

    super::snippets::delete_snippets_for_document(&conn, doc_id)?;
    super::jobs::delete_jobs_for_document(&conn, doc_id)?;
    conn.execute("DELETE FROM manuscripts WHERE doc_id = ?1", [doc_id])?;

    if let Some(manuscript) = manuscript {
        if !manuscript.local_path.is_empty() {
            let local_path = Path::new(&manuscript.local_path);
            let canonical_local = local_path.canonicalize().ok();
            let canonical_root = downloads_dir.canonicalize().ok();
            match (canonical_local, canonical_root) {
                (Some(local), Some(root)) if local.starts_with(&root) => {
                    let _ = std::fs::remove_dir_all(&local);
                }
                _ if local_path.starts_with(downloads_dir) => {
                    let _ = std::fs::remove_dir_all(local_path);
                }
                _ => {
                    return Err(CatalogError::OutsideDownloadsDir {
                        path: local_path.to_path_buf(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let pool = super::super::open(&dir.path().join("vault.db")).unwrap();
        upsert_manuscript(
            &pool,
            "MSS_Urb.lat.1779",
            ManuscriptUpsert {
                library: Some("Vaticana (BAV)"),
                title: Some("Some Title"),
                manifest_url: Some("https://digi.vatlib.it/iiif/MSS_Urb.lat.1779/manifest.json"),
                total_canvases: Some(10),
                ..Default::default()
            },
        )
        .unwrap();

        let manuscript = get_manuscript(&pool, "MSS_Urb.lat.1779").unwrap().unwrap();
        assert_eq!(manuscript.library, "Vaticana");
        assert_eq!(manuscript.display_title, "Some Title");
        assert_eq!(manuscript.total_canvases, 10);
    }

    #[test]
    fn manual_item_type_survives_auto_upsert() {
        let dir = tempdir().unwrap();
        let pool = super::super::open(&dir.path().join("vault.db")).unwrap();
        upsert_manuscript(
            &pool,
            "doc1",
            ManuscriptUpsert {
                library: Some("Gallica"),
                item_type: Some(ItemType::Manoscritto),
                item_type_source: Some(ItemTypeSource::Manual),
                ..Default::default()
            },
        )
        .unwrap();

        upsert_manuscript(
            &pool,
            "doc1",
            ManuscriptUpsert {
                item_type: Some(ItemType::Incunabolo),
                item_type_source: Some(ItemTypeSource::Auto),
                ..Default::default()
            },
        )
        .unwrap();

        let manuscript = get_manuscript(&pool, "doc1").unwrap().unwrap();
        assert_eq!(manuscript.item_type, ItemType::Manoscritto);
        assert_eq!(manuscript.item_type_source, ItemTypeSource::Manual);
    }

    #[test]
    fn delete_refuses_path_outside_downloads_dir() {
        let dir = tempdir().unwrap();
        let pool = super::super::open(&dir.path().join("vault.db")).unwrap();
        let downloads_dir = dir.path().join("downloads");
        std::fs::create_dir_all(&downloads_dir).unwrap();

        upsert_manuscript(
            &pool,
            "doc1",
            ManuscriptUpsert {
                local_path: Some("/etc"),
                ..Default::default()
            },
        )
        .unwrap();

        let result = delete_manuscript(&pool, "doc1", &downloads_dir);
        assert!(result.is_err());
    }

    #[test]
    fn normalize_recomputes_missing_pages_from_disk() {
        let dir = tempdir().unwrap();
        let pool = super::super::open(&dir.path().join("vault.db")).unwrap();
        let downloads_dir = dir.path().join("downloads");
        let temp_root = dir.path().join("tmp");
        let scans_dir = downloads_dir.join("Gallica").join("doc1").join("scans");
        std::fs::create_dir_all(&scans_dir).unwrap();
        std::fs::create_dir_all(&temp_root).unwrap();

        for index in [0usize, 1, 3] {
            std::fs::write(scans_dir.join(format!("pag_{index:04}.jpg")), b"x").unwrap();
        }

        upsert_manuscript(
            &pool,
            "doc1",
            ManuscriptUpsert {
                library: Some("Gallica"),
                local_path: Some(downloads_dir.join("Gallica").join("doc1").to_str().unwrap()),
                total_canvases: Some(5),
                downloaded_canvases: Some(3),
                status: Some(AssetState::Partial),
                ..Default::default()
            },
        )
        .unwrap();

        normalize_asset_states(&pool, 10, &downloads_dir, &temp_root).unwrap();

        let manuscript = get_manuscript(&pool, "doc1").unwrap().unwrap();
        let missing: Vec<usize> = serde_json::from_str(manuscript.missing_pages_json.as_deref().unwrap()).unwrap();
        assert_eq!(missing, vec![3, 5]);
    }
}
