use rusqlite::params;

use crate::db::models::{Collection, Submission};
use crate::error::AppResult;
use crate::naming::{file_extension, is_image_file};
use crate::state::DbPool;
use crate::visibility::Visibility;

/// Repository for submission entry rows. Entries are immutable once written
/// and disappear only when their group cascades away.
#[derive(Clone)]
pub struct SubmissionStore {
    pool: DbPool,
}

impl SubmissionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        group_id: i64,
        uploader_name: &str,
        contributor_token: &str,
        filename: &str,
        original_name: &str,
        mime_type: &str,
        size_bytes: i64,
    ) -> AppResult<i64> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO submissions (group_id, uploader_name, contributor_token, filename, original_name, mime_type, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                group_id,
                uploader_name,
                contributor_token,
                filename,
                original_name,
                mime_type,
                size_bytes
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Entries of a group, newest first. In a shared group a non-admin viewer
    /// only sees their own contributions; in a public group everyone sees
    /// everything; private groups are reached by the admin alone.
    pub fn entries_for_group(
        &self,
        group: &Collection,
        viewer_token: Option<&str>,
        is_admin: bool,
    ) -> AppResult<Vec<Submission>> {
        let conn = self.pool.get()?;
        let filter_by_contributor = !is_admin && group.visibility == Visibility::Shared;

        let mut sql = format!(
            "SELECT {} FROM submissions WHERE group_id = ?1",
            Submission::COLUMNS
        );
        if filter_by_contributor {
            sql.push_str(" AND contributor_token = ?2");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let mut stmt = conn.prepare(&sql)?;
        let mut out = Vec::new();
        if filter_by_contributor {
            let token = viewer_token.unwrap_or("");
            let rows = stmt.query_map(params![group.id, token], Submission::from_row)?;
            for row in rows {
                out.push(row?);
            }
        } else {
            let rows = stmt.query_map(params![group.id], Submission::from_row)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    pub fn get(&self, id: i64) -> AppResult<Submission> {
        let conn = self.pool.get()?;
        Ok(conn.query_row(
            &format!("SELECT {} FROM submissions WHERE id = ?1", Submission::COLUMNS),
            params![id],
            Submission::from_row,
        )?)
    }
}

/// Template-facing shape of a submission entry.
#[derive(Debug, Clone)]
pub struct SubmissionView {
    pub id: i64,
    pub original_name: String,
    pub url: String,
    pub download_url: String,
    pub size_label: String,
    pub uploaded_by: String,
    pub uploaded_at: String,
    pub is_image: bool,
    pub is_pdf: bool,
}

pub fn entry_view(rec: &Submission) -> SubmissionView {
    let url = format!("/submitted/file/{}", rec.id);
    let mime = rec.mime_type.as_deref().unwrap_or("");
    SubmissionView {
        id: rec.id,
        original_name: rec.original_name.clone(),
        download_url: format!("{}?download=1", url),
        url,
        size_label: human_size(rec.size_bytes),
        uploaded_by: rec.uploader_name.clone(),
        uploaded_at: display_time(&rec.created_at),
        is_image: mime.to_ascii_lowercase().starts_with("image/")
            || is_image_file(&rec.original_name),
        is_pdf: matches!(file_extension(&rec.original_name).as_deref(), Some("pdf")),
    }
}

pub fn human_size(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes.max(0))
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

/// SQLite's CURRENT_TIMESTAMP renders as `YYYY-MM-DD HH:MM:SS`; show it as
/// `DD.MM.YYYY HH:MM` and fall back to the raw value on anything else.
fn display_time(raw: &str) -> String {
    match chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        Ok(dt) => dt.format("%d.%m.%Y %H:%M").to_string(),
        Err(_) => raw.to_string(),
    }
}
