//! `download_jobs` table operations.

use jiff::Timestamp;
use rusqlite::{Connection, OptionalExtension, params};

use super::{CatalogPool, DownloadJob, DownloadJobStatus};
use crate::error::CatalogError;

fn now() -> String {
    Timestamp::now().to_string()
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<DownloadJob> {
    let status_text: String = row.get("status")?;
    Ok(DownloadJob {
        job_id: row.get("job_id")?,
        doc_id: row.get("doc_id")?,
        library: row.get("library")?,
        manifest_url: row.get("manifest_url")?,
        status: status_text.parse().unwrap_or(DownloadJobStatus::Error),
        current_page: row.get("current_page")?,
        total_pages: row.get("total_pages")?,
        priority: row.get("priority")?,
        queue_position: row.get("queue_position")?,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Upserts at `status=queued, current=0, total=0`.
pub fn create_download_job(
    pool: &CatalogPool,
    job_id: &str,
    doc_id: &str,
    library: &str,
    manifest_url: &str,
) -> Result<(), CatalogError> {
    let conn = pool.get()?;
    let timestamp = now();
    let next_position: i64 =
        conn.query_row("SELECT COALESCE(MAX(queue_position), 0) + 1 FROM download_jobs", [], |row| row.get(0))?;
    conn.execute(
        "INSERT INTO download_jobs (job_id, doc_id, library, manifest_url, status, current_page, total_pages, priority, queue_position, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'queued', 0, 0, 0, ?5, ?6, ?6)
         ON CONFLICT(job_id) DO UPDATE SET
            doc_id = excluded.doc_id,
            library = excluded.library,
            manifest_url = excluded.manifest_url,
            status = 'queued',
            current_page = 0,
            total_pages = 0,
            queue_position = excluded.queue_position,
            updated_at = excluded.updated_at",
        params![job_id, doc_id, library, manifest_url, next_position, timestamp],
    )?;
    Ok(())
}

pub fn mark_job_running(pool: &CatalogPool, job_id: &str) -> Result<(), CatalogError> {
    let conn = pool.get()?;
    let timestamp = now();
    conn.execute(
        "UPDATE download_jobs SET status = 'running', started_at = ?2, updated_at = ?2 WHERE job_id = ?1",
        params![job_id, timestamp],
    )?;
    Ok(())
}

/// Writes `(current_page, total_pages, status=running)` for a progress tick.
pub fn update_job_progress(
    pool: &CatalogPool,
    job_id: &str,
    current_page: i64,
    total_pages: i64,
) -> Result<(), CatalogError> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE download_jobs SET current_page = ?2, total_pages = ?3, status = 'running', updated_at = ?4 WHERE job_id = ?1",
        params![job_id, current_page, total_pages, now()],
    )?;
    Ok(())
}

pub fn mark_job_cancelling(pool: &CatalogPool, job_id: &str) -> Result<(), CatalogError> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE download_jobs SET status = 'cancelling', updated_at = ?2 WHERE job_id = ?1",
        params![job_id, now()],
    )?;
    Ok(())
}

fn finish_job(pool: &CatalogPool, job_id: &str, status: DownloadJobStatus, error_message: Option<&str>) -> Result<(), CatalogError> {
    let conn = pool.get()?;
    let timestamp = now();
    conn.execute(
        "UPDATE download_jobs SET status = ?2, error_message = ?3, finished_at = ?4, updated_at = ?4 WHERE job_id = ?1",
        params![job_id, status.as_str(), error_message, timestamp],
    )?;
    Ok(())
}

pub fn mark_job_completed(pool: &CatalogPool, job_id: &str) -> Result<(), CatalogError> {
    finish_job(pool, job_id, DownloadJobStatus::Completed, None)
}

pub fn mark_job_cancelled(pool: &CatalogPool, job_id: &str) -> Result<(), CatalogError> {
    finish_job(pool, job_id, DownloadJobStatus::Cancelled, Some("Cancelled by user"))
}

pub fn mark_job_error(pool: &CatalogPool, job_id: &str, message: &str) -> Result<(), CatalogError> {
    finish_job(pool, job_id, DownloadJobStatus::Error, Some(message))
}

pub fn get_job(pool: &CatalogPool, job_id: &str) -> Result<Option<DownloadJob>, CatalogError> {
    let conn = pool.get()?;
    let job = conn
        .query_row("SELECT * FROM download_jobs WHERE job_id = ?1", [job_id], row_to_job)
        .optional()?;
    Ok(job)
}

pub fn list_jobs(pool: &CatalogPool, active_only: bool) -> Result<Vec<DownloadJob>, CatalogError> {
    let conn = pool.get()?;
    let sql = if active_only {
        "SELECT * FROM download_jobs WHERE status IN ('queued','running','cancelling')
         ORDER BY CASE status WHEN 'running' THEN 0 WHEN 'cancelling' THEN 1 ELSE 2 END,
                  priority DESC, queue_position ASC"
    } else {
        "SELECT * FROM download_jobs ORDER BY created_at DESC"
    };
    let mut stmt = conn.prepare(sql)?;
    let jobs = stmt.query_map([], row_to_job)?.collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

pub fn jobs_for_document(pool: &CatalogPool, doc_id: &str) -> Result<Vec<DownloadJob>, CatalogError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM download_jobs WHERE doc_id = ?1")?;
    let jobs = stmt.query_map([doc_id], row_to_job)?.collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

pub fn has_active_job_for(pool: &CatalogPool, doc_id: &str, library: &str) -> Result<bool, CatalogError> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM download_jobs WHERE doc_id = ?1 AND library = ?2 AND status IN ('queued','running','cancelling')",
        params![doc_id, library],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn delete_jobs_for_document(conn: &Connection, doc_id: &str) -> Result<(), CatalogError> {
    conn.execute("DELETE FROM download_jobs WHERE doc_id = ?1", [doc_id])?;
    Ok(())
}

/// Forces any non-terminal row to `error` with message "server restart".
pub(super) fn mark_stale_jobs_as_errored(conn: &Connection) -> Result<(), CatalogError> {
    conn.execute(
        "UPDATE download_jobs SET status = 'error', error_message = 'server restart', finished_at = ?1, updated_at = ?1
         WHERE status IN ('queued', 'running', 'cancelling', 'paused')",
        params![now()],
    )?;
    Ok(())
}

/// Prunes terminal job rows older than `retention_days`.
pub fn prune_terminal_jobs(pool: &CatalogPool, retention_days: u32) -> Result<usize, CatalogError> {
    let conn = pool.get()?;
    let cutoff = Timestamp::now() - jiff::Span::new().days(i64::from(retention_days));
    let pruned = conn.execute(
        "DELETE FROM download_jobs WHERE status IN ('completed','cancelled','error') AND updated_at < ?1",
        [cutoff.to_string()],
    )?;
    Ok(pruned)
}
