//! `snippets` table operations. Out of
//! core scope beyond table ownership — no transcription or cropping logic
//! lives here.

use rusqlite::{params, Connection};

use super::{CatalogPool, Snippet};
use crate::error::CatalogError;

fn row_to_snippet(row: &rusqlite::Row) -> rusqlite::Result<Snippet> {
    Ok(Snippet {
        id: row.get("id")?,
        doc_id: row.get("doc_id")?,
        page_number: row.get("page_number")?,
        image_path: row.get("image_path")?,
        category: row.get("category")?,
        transcription: row.get("transcription")?,
        notes: row.get("notes")?,
        box_x: row.get("box_x")?,
        box_y: row.get("box_y")?,
        box_width: row.get("box_width")?,
        box_height: row.get("box_height")?,
    })
}

pub fn list_snippets(pool: &CatalogPool, doc_id: &str) -> Result<Vec<Snippet>, CatalogError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM snippets WHERE doc_id = ?1 ORDER BY page_number ASC, id ASC")?;
    let rows = stmt.query_map([doc_id], row_to_snippet)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_snippet(
    pool: &CatalogPool,
    doc_id: &str,
    page_number: i64,
    image_path: &str,
    category: Option<&str>,
    box_rect: (f64, f64, f64, f64),
) -> Result<i64, CatalogError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO snippets (doc_id, page_number, image_path, category, box_x, box_y, box_width, box_height)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![doc_id, page_number, image_path, category, box_rect.0, box_rect.1, box_rect.2, box_rect.3],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_snippets_for_document(conn: &Connection, doc_id: &str) -> Result<(), CatalogError> {
    let mut stmt = conn.prepare("SELECT image_path FROM snippets WHERE doc_id = ?1")?;
    let paths: Vec<String> = stmt.query_map([doc_id], |row| row.get(0))?.collect::<Result<_, _>>()?;
    drop(stmt);
    for path in paths {
        let _ = std::fs::remove_file(path);
    }
    conn.execute("DELETE FROM snippets WHERE doc_id = ?1", [doc_id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn insert_then_list_round_trips() {
        let dir = tempdir().unwrap();
        let pool = super::super::open(&dir.path().join("vault.db")).unwrap();
        insert_snippet(&pool, "doc1", 1, "/tmp/snip1.jpg", Some("initial"), (0.0, 0.0, 100.0, 50.0)).unwrap();
        let snippets = list_snippets(&pool, "doc1").unwrap();
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].category.as_deref(), Some("initial"));
    }

    #[test]
    fn delete_for_document_removes_rows() {
        let dir = tempdir().unwrap();
        let pool = super::super::open(&dir.path().join("vault.db")).unwrap();
        insert_snippet(&pool, "doc1", 1, "/tmp/does-not-exist.jpg", None, (0.0, 0.0, 1.0, 1.0)).unwrap();
        let conn = pool.get().unwrap();
        delete_snippets_for_document(&conn, "doc1").unwrap();
        drop(conn);
        assert!(list_snippets(&pool, "doc1").unwrap().is_empty());
    }
}
