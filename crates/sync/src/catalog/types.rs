//! Catalog row types. Enums round-trip through `TEXT` columns
//! via `FromStr`/`Display`, mirroring how library item types are normalized
//! before being persisted.

use std::fmt;
use std::str::FromStr;

use crate::enrichment::{ItemType, ItemTypeSource};

/// Sum type derived from `(downloaded, total, status)`, except that `queued`/`downloading`/`error` are driven
/// externally and override the pure function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    Saved,
    Queued,
    Downloading,
    Partial,
    Complete,
    Error,
}

impl AssetState {
    /// Pure function of `(downloaded, total)` for the non-externally-driven
    /// states.
    pub fn from_counts(downloaded: i64, total: i64) -> Self {
        if total > 0 && downloaded >= total {
            AssetState::Complete
        } else if downloaded > 0 && downloaded < total {
            AssetState::Partial
        } else {
            AssetState::Saved
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetState::Saved => "saved",
            AssetState::Queued => "queued",
            AssetState::Downloading => "downloading",
            AssetState::Partial => "partial",
            AssetState::Complete => "complete",
            AssetState::Error => "error",
        }
    }
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetState {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "saved" => AssetState::Saved,
            "queued" => AssetState::Queued,
            "downloading" => AssetState::Downloading,
            "partial" => AssetState::Partial,
            "complete" => AssetState::Complete,
            "error" => AssetState::Error,
            _ => return Err(()),
        })
    }
}

/// Download job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadJobStatus {
    Queued,
    Running,
    Cancelling,
    Cancelled,
    Paused,
    Completed,
    Error,
}

impl DownloadJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadJobStatus::Queued => "queued",
            DownloadJobStatus::Running => "running",
            DownloadJobStatus::Cancelling => "cancelling",
            DownloadJobStatus::Cancelled => "cancelled",
            DownloadJobStatus::Paused => "paused",
            DownloadJobStatus::Completed => "completed",
            DownloadJobStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadJobStatus::Cancelled | DownloadJobStatus::Completed | DownloadJobStatus::Error
        )
    }
}

impl fmt::Display for DownloadJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadJobStatus {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queued" => DownloadJobStatus::Queued,
            "running" => DownloadJobStatus::Running,
            "cancelling" => DownloadJobStatus::Cancelling,
            "cancelled" => DownloadJobStatus::Cancelled,
            "paused" => DownloadJobStatus::Paused,
            "completed" => DownloadJobStatus::Completed,
            "error" => DownloadJobStatus::Error,
            _ => return Err(()),
        })
    }
}

/// A catalog row.
#[derive(Debug, Clone)]
pub struct Manuscript {
    pub doc_id: String,
    pub library: String,
    pub display_title: String,
    pub manifest_url: String,
    pub local_path: String,
    pub total_canvases: i64,
    pub downloaded_canvases: i64,
    pub status: AssetState,
    pub item_type: ItemType,
    pub item_type_source: ItemTypeSource,
    pub shelfmark: Option<String>,
    pub date_label: Option<String>,
    pub language_label: Option<String>,
    pub source_detail_url: Option<String>,
    pub reference_text: Option<String>,
    pub metadata_json: Option<String>,
    pub missing_pages_json: Option<String>,
    pub updated_at: String,
    pub error_log: Option<String>,
}

/// A catalog row.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub job_id: String,
    pub doc_id: String,
    pub library: String,
    pub manifest_url: String,
    pub status: DownloadJobStatus,
    pub current_page: i64,
    pub total_pages: i64,
    pub priority: i64,
    pub queue_position: i64,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub updated_at: String,
}

/// A catalog row.
#[derive(Debug, Clone)]
pub struct Snippet {
    pub id: i64,
    pub doc_id: String,
    pub page_number: i64,
    pub image_path: String,
    pub category: Option<String>,
    pub transcription: Option<String>,
    pub notes: Option<String>,
    pub box_x: f64,
    pub box_y: f64,
    pub box_width: f64,
    pub box_height: f64,
}

/// Normalizes legacy/alternate library-name spellings to the canonical set.
pub fn normalize_library_name(raw: &str) -> String {
    if raw.trim().eq_ignore_ascii_case("Vaticana (BAV)") {
        "Vaticana".to_string()
    } else {
        raw.trim().to_string()
    }
}
