//! Recipe repository: insert and lookup for the `recipes` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw recipe row. `hashtags` and `data` hold JSON text.
#[derive(Debug, Clone)]
pub struct RecipeRow {
    pub id: String,
    pub job_id: String,
    pub source_url: String,
    pub caption: String,
    pub owner_username: Option<String>,
    pub media_url: Option<String>,
    pub hashtags: String,
    pub data: String,
    pub created_at: String,
}

impl RecipeRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            source_url: row.get("source_url")?,
            caption: row.get("caption")?,
            owner_username: row.get("owner_username")?,
            media_url: row.get("media_url")?,
            hashtags: row.get("hashtags")?,
            data: row.get("data")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert(conn: &Connection, recipe: &RecipeRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO recipes (id, job_id, source_url, caption, owner_username, media_url,
         hashtags, data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            recipe.id,
            recipe.job_id,
            recipe.source_url,
            recipe.caption,
            recipe.owner_username,
            recipe.media_url,
            recipe.hashtags,
            recipe.data,
            recipe.created_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<RecipeRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM recipes WHERE id = ?1",
            params![id],
            RecipeRow::from_row,
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert(
                conn,
                &RecipeRow {
                    id: "r1".to_string(),
                    job_id: "j1".to_string(),
                    source_url: "https://a".to_string(),
                    caption: "Pasta night".to_string(),
                    owner_username: Some("chef".to_string()),
                    media_url: None,
                    hashtags: "[\"pasta\"]".to_string(),
                    data: "{}".to_string(),
                    created_at: "2026-01-01T00:00:00Z".to_string(),
                },
            )?;
            let found = find_by_id(conn, "r1")?.unwrap();
            assert_eq!(found.caption, "Pasta night");
            assert_eq!(found.owner_username.as_deref(), Some("chef"));
            assert!(find_by_id(conn, "r2")?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
