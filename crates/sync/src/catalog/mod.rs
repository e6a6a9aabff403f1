//! SQLite catalog. `r2d2::Pool<SqliteConnectionManager>` opened through an
//! ordered migration list executed against a bookkeeping `migrations`
//! table, covering the manuscripts/download_jobs/snippets schema.

mod jobs;
mod manuscripts;
mod snippets;
mod types;

pub use jobs::*;
pub use manuscripts::*;
pub use snippets::*;
pub use types::*;

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::CatalogError;

pub type CatalogPool = Pool<SqliteConnectionManager>;

const MIGRATIONS: [&str; 4] = [
    r#"
CREATE TABLE migrations (
    id INTEGER PRIMARY KEY,
    ordinal INTEGER NOT NULL UNIQUE
);
"#,
    r#"
CREATE TABLE manuscripts (
    doc_id TEXT PRIMARY KEY,
    library TEXT NOT NULL,
    display_title TEXT NOT NULL DEFAULT '',
    manifest_url TEXT NOT NULL DEFAULT '',
    local_path TEXT NOT NULL DEFAULT '',
    total_canvases INTEGER NOT NULL DEFAULT 0,
    downloaded_canvases INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'saved',
    item_type TEXT NOT NULL DEFAULT 'non classificato',
    item_type_source TEXT NOT NULL DEFAULT 'auto',
    shelfmark TEXT,
    date_label TEXT,
    language_label TEXT,
    source_detail_url TEXT,
    reference_text TEXT,
    metadata_json TEXT,
    missing_pages_json TEXT,
    updated_at TEXT NOT NULL DEFAULT '',
    error_log TEXT
);
"#,
    r#"
CREATE TABLE download_jobs (
    job_id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL,
    library TEXT NOT NULL,
    manifest_url TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    current_page INTEGER NOT NULL DEFAULT 0,
    total_pages INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    queue_position INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    updated_at TEXT NOT NULL
);
"#,
    r#"
CREATE TABLE snippets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    doc_id TEXT NOT NULL,
    page_number INTEGER NOT NULL,
    image_path TEXT NOT NULL,
    category TEXT,
    transcription TEXT,
    notes TEXT,
    box_x REAL NOT NULL DEFAULT 0,
    box_y REAL NOT NULL DEFAULT 0,
    box_width REAL NOT NULL DEFAULT 0,
    box_height REAL NOT NULL DEFAULT 0
);
"#,
];

/// Required columns that trigger a one-time drop-and-recreate of
/// `manuscripts` if missing.
const REQUIRED_MANUSCRIPT_COLUMNS: [&str; 4] = ["status", "local_path", "updated_at", "display_title"];

fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>, CatalogError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, CatalogError> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn run_migrations(conn: &Connection) -> Result<(), CatalogError> {
    if table_exists(conn, "manuscripts")? {
        let columns = column_names(conn, "manuscripts")?;
        let missing_required = REQUIRED_MANUSCRIPT_COLUMNS
            .iter()
            .any(|required| !columns.iter().any(|c| c == required));
        if missing_required {
            tracing::warn!("manuscripts table missing required columns, recreating");
            conn.execute("DROP TABLE manuscripts", [])?;
            if table_exists(conn, "migrations")? {
                conn.execute("DELETE FROM migrations WHERE ordinal = 1", [])?;
            }
        }
    }

    let finished: Vec<i64> = if table_exists(conn, "migrations")? {
        let mut stmt = conn.prepare("SELECT ordinal FROM migrations")?;
        stmt.query_map([], |row| row.get(0))?.collect::<Result<_, _>>()?
    } else {
        Vec::new()
    };

    for (ordinal, migration) in MIGRATIONS.iter().enumerate() {
        if !finished.contains(&(ordinal as i64)) {
            conn.execute(migration, ())?;
            conn.execute("INSERT INTO migrations (ordinal) VALUES (?1)", [ordinal as i64])?;
        }
    }

    normalize_legacy_item_types(conn)?;
    Ok(())
}

fn normalize_legacy_item_types(conn: &Connection) -> Result<(), CatalogError> {
    const KNOWN: [&str; 8] = [
        "manoscritto",
        "libro a stampa",
        "incunabolo",
        "periodico",
        "musica/spartito",
        "mappa/atlante",
        "miscellanea",
        "non classificato",
    ];
    let placeholders = KNOWN.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "UPDATE manuscripts SET item_type = 'non classificato' WHERE item_type NOT IN ({placeholders})"
    );
    let params: Vec<&dyn rusqlite::ToSql> = KNOWN.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
    conn.execute(&sql, params.as_slice())?;
    Ok(())
}

/// Opens (or creates) the catalog database at `db_path`, running migrations
/// and forcibly transitioning any non-terminal download jobs left behind by
/// a crash to `error`.
pub fn open(db_path: &Path) -> Result<CatalogPool, CatalogError> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")
    });
    let pool = Pool::new(manager)?;
    let conn = pool.get()?;
    run_migrations(&conn)?;
    jobs::mark_stale_jobs_as_errored(&conn)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn opens_fresh_database_and_creates_tables() {
        let dir = tempdir().unwrap();
        let pool = open(&dir.path().join("vault.db")).unwrap();
        let conn = pool.get().unwrap();
        assert!(table_exists(&conn, "manuscripts").unwrap());
        assert!(table_exists(&conn, "download_jobs").unwrap());
        assert!(table_exists(&conn, "snippets").unwrap());
    }

    #[test]
    fn reopening_existing_database_is_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("vault.db");
        open(&db_path).unwrap();
        let pool = open(&db_path).unwrap();
        let conn = pool.get().unwrap();
        assert!(table_exists(&conn, "manuscripts").unwrap());
    }
}
