//! Job repository: CRUD operations for the `jobs` table.
//!
//! Functions take a bare connection so callers can compose them inside a
//! transaction (`rusqlite::Transaction` derefs to `Connection`).

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub input_url: String,
    pub status: String,
    pub progress: i64,
    pub recipe_id: Option<String>,
    pub error: Option<String>,
    /// JSON object.
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            input_url: row.get("input_url")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            recipe_id: row.get("recipe_id")?,
            error: row.get("error")?,
            metadata: row.get("metadata")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, input_url, status, progress, recipe_id, error, metadata,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            job.id,
            job.input_url,
            job.status,
            job.progress,
            job.recipe_id,
            job.error,
            job.metadata,
            job.created_at,
            job.updated_at,
        ],
    )?;
    Ok(())
}

/// Overwrites every mutable column of an existing row.
/// `id`, `input_url` and `created_at` are never changed.
pub fn update(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET status=?2, progress=?3, recipe_id=?4, error=?5, metadata=?6,
         updated_at=?7
         WHERE id=?1",
        params![
            job.id,
            job.status,
            job.progress,
            job.recipe_id,
            job.error,
            job.metadata,
            job.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
        .optional()?;
    Ok(row)
}

/// All jobs with the given status, oldest first.
pub fn find_by_status(conn: &Connection, status: &str) -> Result<Vec<JobRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at ASC")?;
    let rows = stmt
        .query_map(params![status], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All jobs for the given input URL, newest first.
pub fn find_by_url(conn: &Connection, input_url: &str) -> Result<Vec<JobRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM jobs WHERE input_url = ?1 ORDER BY created_at DESC")?;
    let rows = stmt
        .query_map(params![input_url], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
