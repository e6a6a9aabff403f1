//! Filesystem layout for the vault.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Resolves every path the vault writes to, rooted at a user-supplied
/// prefix (see DESIGN.md for how this relates to the default data directory
/// picked when no prefix is given).
#[derive(Debug, Clone)]
pub struct Environment {
    prefix: PathBuf,
}

impl Environment {
    pub fn new(prefix: impl Into<PathBuf>) -> io::Result<Self> {
        let env = Self {
            prefix: prefix.into(),
        };
        info!("Data directory: {}", env.data_dir().display());
        fs::create_dir_all(env.data_dir())?;
        info!("Downloads directory: {}", env.downloads_dir().display());
        fs::create_dir_all(env.downloads_dir())?;
        info!("Temp directory: {}", env.temp_root().display());
        fs::create_dir_all(env.temp_root())?;
        Ok(env)
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Holds `vault.db` and process-wide bookkeeping.
    pub fn data_dir(&self) -> PathBuf {
        self.prefix.join("data")
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.data_dir().join("vault.db")
    }

    /// `<downloads>/<library>/<doc_id>/` root.
    pub fn downloads_dir(&self) -> PathBuf {
        self.prefix.join("downloads")
    }

    pub fn document_root(&self, library: &str, doc_id: &str) -> PathBuf {
        self.downloads_dir().join(library).join(doc_id)
    }

    /// `<temp_root>/<doc_id>/`.
    pub fn temp_root(&self) -> PathBuf {
        self.prefix.join("tmp")
    }

    pub fn document_temp_dir(&self, doc_id: &str) -> PathBuf {
        self.temp_root().join(doc_id)
    }
}

pub(crate) fn document_data_dir(root: &Path) -> PathBuf {
    root.join("data")
}

pub(crate) fn document_scans_dir(root: &Path) -> PathBuf {
    root.join("scans")
}

pub(crate) fn document_pdf_dir(root: &Path) -> PathBuf {
    root.join("pdf")
}
