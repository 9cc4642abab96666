use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::db::models::Collection;
use crate::error::AppError;
use crate::naming::{is_within, sanitize_file_name};
use crate::state::DbPool;
use crate::visibility::Visibility;

/// Which table a store operates on. Folders live directly under the gallery
/// root and have a protected row with `path = ''`; submission groups live
/// under the submissions root and are all deletable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Folders,
    SubmissionGroups,
}

impl CollectionKind {
    fn table(self) -> &'static str {
        match self {
            CollectionKind::Folders => "folders",
            CollectionKind::SubmissionGroups => "submission_groups",
        }
    }

    fn list_order(self) -> &'static str {
        match self {
            CollectionKind::Folders => "name",
            CollectionKind::SubmissionGroups => "created_at DESC",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("name is required")]
    EmptyName,

    #[error("name could not be converted to a valid identifier")]
    UnusableName,

    #[error("the root folder is protected")]
    Protected,

    #[error("invalid directory")]
    InvalidPath,

    #[error("a directory with this name already exists")]
    NameExists,

    #[error("rename failed: {0}")]
    RenameFailed(std::io::Error),

    /// The metadata update failed after the directory was renamed; the
    /// directory rename has been reverted.
    #[error("update failed, directory restored: {0}")]
    RolledBack(rusqlite::Error),

    /// Worst case: the metadata update failed and the directory could not be
    /// renamed back either. Both errors are kept for the operator.
    #[error("rename failed: {db} (rollback also failed: {fs})")]
    RollbackFailed {
        db: rusqlite::Error,
        fs: std::io::Error,
    },

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CollectionError> for AppError {
    fn from(err: CollectionError) -> Self {
        match err {
            CollectionError::EmptyName
            | CollectionError::UnusableName
            | CollectionError::Protected
            | CollectionError::InvalidPath
            | CollectionError::NameExists => AppError::BadRequest(err.to_string()),
            CollectionError::Db(rusqlite::Error::QueryReturnedNoRows) => AppError::NotFound,
            CollectionError::Db(e) => AppError::Database(e),
            CollectionError::Pool(e) => AppError::Pool(e),
            CollectionError::Io(e) => AppError::Io(e),
            CollectionError::RenameFailed(_)
            | CollectionError::RolledBack(_)
            | CollectionError::RollbackFailed { .. } => AppError::Internal(err.to_string()),
        }
    }
}

/// Repository for one collection table plus the directory tree mirroring it.
/// Row and directory are created, renamed and deleted in lockstep.
#[derive(Clone)]
pub struct CollectionStore {
    pool: DbPool,
    kind: CollectionKind,
    root: PathBuf,
}

impl CollectionStore {
    pub fn folders(pool: DbPool, gallery_root: PathBuf) -> Self {
        Self {
            pool,
            kind: CollectionKind::Folders,
            root: gallery_root,
        }
    }

    pub fn submission_groups(pool: DbPool, submissions_root: PathBuf) -> Self {
        Self {
            pool,
            kind: CollectionKind::SubmissionGroups,
            root: submissions_root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// On-disk directory for a record. The protected root folder maps to the
    /// gallery root itself.
    pub fn dir_for(&self, rec: &Collection) -> PathBuf {
        if rec.path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&rec.path)
        }
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>, CollectionError> {
        Ok(self.pool.get()?)
    }

    pub fn create(&self, name: &str) -> Result<Collection, CollectionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CollectionError::EmptyName);
        }
        let base = slug_base(name)?;

        let conn = self.conn()?;
        let slug = self.next_free_slug(&conn, &base, None)?;

        let dir = self.root.join(&slug);
        if !is_within(&self.root, &dir) {
            return Err(CollectionError::InvalidPath);
        }
        std::fs::create_dir_all(&dir)?;

        conn.execute(
            &format!(
                "INSERT INTO {} (name, slug, path, visibility) VALUES (?1, ?2, ?3, ?4)",
                self.kind.table()
            ),
            params![name, slug, slug, Visibility::Private],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_by_id(id)
    }

    /// All collections for the admin, public ones only for everyone else.
    /// Shared and private rows are never enumerable without a session.
    pub fn list(&self, include_hidden: bool) -> Result<Vec<Collection>, CollectionError> {
        let conn = self.conn()?;
        let mut sql = format!("SELECT {} FROM {}", Collection::COLUMNS, self.kind.table());
        if !include_hidden {
            sql.push_str(" WHERE visibility = 'public'");
        }
        sql.push_str(&format!(" ORDER BY {}", self.kind.list_order()));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], Collection::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Collection, CollectionError> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            &format!(
                "SELECT {} FROM {} WHERE id = ?1",
                Collection::COLUMNS,
                self.kind.table()
            ),
            params![id],
            Collection::from_row,
        )?)
    }

    pub fn get_by_slug(&self, slug: &str) -> Result<Collection, CollectionError> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            &format!(
                "SELECT {} FROM {} WHERE slug = ?1",
                Collection::COLUMNS,
                self.kind.table()
            ),
            params![slug],
            Collection::from_row,
        )?)
    }

    pub fn get_by_token(&self, token: &str) -> Result<Collection, CollectionError> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            &format!(
                "SELECT {} FROM {} WHERE shared_token = ?1",
                Collection::COLUMNS,
                self.kind.table()
            ),
            params![token],
            Collection::from_row,
        )?)
    }

    /// Switching to `shared` lazily issues a token; switching away leaves the
    /// token in place so the old link revives if sharing is re-enabled.
    pub fn update_visibility(
        &self,
        id: i64,
        visibility: Visibility,
    ) -> Result<Collection, CollectionError> {
        {
            let conn = self.conn()?;
            conn.execute(
                &format!(
                    "UPDATE {} SET visibility = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
                    self.kind.table()
                ),
                params![visibility, id],
            )?;
        }
        if visibility == Visibility::Shared {
            self.ensure_shared_token(id)?;
        }
        self.get_by_id(id)
    }

    /// Get-or-create the share token. Creating resets the view counter;
    /// an existing token is returned untouched.
    pub fn ensure_shared_token(&self, id: i64) -> Result<String, CollectionError> {
        let rec = self.get_by_id(id)?;
        if let Some(token) = rec.shared_token.filter(|t| !t.is_empty()) {
            return Ok(token);
        }
        let token = random_share_token();
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "UPDATE {} SET shared_token = ?1, shared_views = 0, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
                self.kind.table()
            ),
            params![token, id],
        )?;
        Ok(token)
    }

    /// Unconditionally rotate the share token. The old link dies immediately.
    pub fn regenerate_shared_token(&self, id: i64) -> Result<Collection, CollectionError> {
        let token = random_share_token();
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "UPDATE {} SET shared_token = ?1, shared_views = 0, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
                self.kind.table()
            ),
            params![token, id],
        )?;
        drop(conn);
        self.get_by_id(id)
    }

    pub fn increment_shared_views(&self, id: i64) -> Result<(), CollectionError> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "UPDATE {} SET shared_views = shared_views + 1 WHERE id = ?1",
                self.kind.table()
            ),
            params![id],
        )?;
        Ok(())
    }

    /// Rename the collection. When the slug changes, the directory is renamed
    /// first and the rename is reverted if the metadata update fails.
    pub fn rename(&self, id: i64, name: &str) -> Result<Collection, CollectionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CollectionError::EmptyName);
        }

        let rec = self.get_by_id(id)?;
        if rec.path.trim().is_empty() {
            return Err(CollectionError::Protected);
        }

        let base = slug_base(name)?;
        let conn = self.conn()?;
        let slug = self.next_free_slug(&conn, &base, Some(id))?;

        let slug_changed = slug != rec.slug;
        let name_changed = name != rec.name;
        if !slug_changed && !name_changed {
            return Ok(rec);
        }

        let old_dir = self.root.join(&rec.path);
        let new_dir = self.root.join(&slug);
        let mut new_path = rec.path.clone();

        if slug_changed {
            if old_dir == self.root || !is_within(&self.root, &old_dir) {
                return Err(CollectionError::InvalidPath);
            }
            if !is_within(&self.root, &new_dir) {
                return Err(CollectionError::InvalidPath);
            }
            match std::fs::metadata(&new_dir) {
                Ok(_) => return Err(CollectionError::NameExists),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            // The directory may have gone missing out-of-band; recreate it so
            // the rename has something to move.
            if std::fs::metadata(&old_dir).is_err() {
                std::fs::create_dir_all(&old_dir)?;
            }
            std::fs::rename(&old_dir, &new_dir).map_err(CollectionError::RenameFailed)?;
            new_path = slug.clone();
        }

        let update = conn.execute(
            &format!(
                "UPDATE {} SET name = ?1, slug = ?2, path = ?3, updated_at = CURRENT_TIMESTAMP WHERE id = ?4",
                self.kind.table()
            ),
            params![name, slug, new_path, id],
        );

        if let Err(db_err) = update {
            if slug_changed {
                return match std::fs::rename(&new_dir, &old_dir) {
                    Ok(()) => Err(CollectionError::RolledBack(db_err)),
                    Err(fs_err) => Err(CollectionError::RollbackFailed {
                        db: db_err,
                        fs: fs_err,
                    }),
                };
            }
            return Err(db_err.into());
        }

        drop(conn);
        self.get_by_id(id)
    }

    /// Remove the directory tree, then the row. The protected root folder
    /// refuses; a directory already gone is not an error.
    pub fn delete(&self, id: i64) -> Result<(), CollectionError> {
        let rec = self.get_by_id(id)?;
        if self.kind == CollectionKind::Folders && rec.path.trim().is_empty() {
            return Err(CollectionError::Protected);
        }

        if !rec.path.trim().is_empty() {
            let dir = self.root.join(&rec.path);
            if dir == self.root || !is_within(&self.root, &dir) {
                return Err(CollectionError::InvalidPath);
            }
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let conn = self.conn()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.kind.table()),
            params![id],
        )?;
        Ok(())
    }

    fn slug_taken(
        &self,
        conn: &Connection,
        slug: &str,
        exclude: Option<i64>,
    ) -> Result<bool, CollectionError> {
        let existing: Option<i64> = conn
            .query_row(
                &format!("SELECT id FROM {} WHERE slug = ?1 LIMIT 1", self.kind.table()),
                params![slug],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match existing {
            None => false,
            Some(id) => exclude != Some(id),
        })
    }

    fn next_free_slug(
        &self,
        conn: &Connection,
        base: &str,
        exclude: Option<i64>,
    ) -> Result<String, CollectionError> {
        let mut slug = base.to_string();
        let mut i = 2;
        while self.slug_taken(conn, &slug, exclude)? {
            slug = format!("{}-{}", base, i);
            i += 1;
        }
        Ok(slug)
    }
}

fn slug_base(name: &str) -> Result<String, CollectionError> {
    let base = sanitize_file_name(name);
    if !base.is_empty() {
        return Ok(base);
    }
    let base = sanitize_file_name(&name.to_lowercase().replace(' ', "-"));
    if base.is_empty() {
        return Err(CollectionError::UnusableName);
    }
    Ok(base)
}

fn random_share_token() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use tempfile::TempDir;

    fn folder_store() -> (TempDir, CollectionStore) {
        let tmp = TempDir::new().unwrap();
        let store = CollectionStore::folders(test_pool(), tmp.path().to_path_buf());
        (tmp, store)
    }

    fn group_store() -> (TempDir, CollectionStore) {
        let tmp = TempDir::new().unwrap();
        let store = CollectionStore::submission_groups(test_pool(), tmp.path().to_path_buf());
        (tmp, store)
    }

    #[test]
    fn create_derives_slug_and_directory() {
        let (tmp, store) = folder_store();
        let folder = store.create("My Summer Trip").unwrap();
        assert_eq!(folder.slug, "my-summer-trip");
        assert_eq!(folder.path, "my-summer-trip");
        assert_eq!(folder.visibility, Visibility::Private);
        assert!(tmp.path().join("my-summer-trip").is_dir());
    }

    #[test]
    fn duplicate_names_get_suffixed_slugs() {
        let (_tmp, store) = folder_store();
        let a = store.create("Trip").unwrap();
        let b = store.create("Trip").unwrap();
        let c = store.create("Trip").unwrap();
        assert_eq!(a.slug, "trip");
        assert_eq!(b.slug, "trip-2");
        assert_eq!(c.slug, "trip-3");
    }

    #[test]
    fn unusable_name_is_rejected() {
        let (_tmp, store) = folder_store();
        assert!(matches!(
            store.create("***"),
            Err(CollectionError::UnusableName)
        ));
        assert!(matches!(store.create("   "), Err(CollectionError::EmptyName)));
    }

    #[test]
    fn listing_hides_non_public_without_admin() {
        let (_tmp, store) = folder_store();
        let trip = store.create("Trip").unwrap();
        store.update_visibility(trip.id, Visibility::Shared).unwrap();

        let public: Vec<String> = store
            .list(false)
            .unwrap()
            .into_iter()
            .map(|c| c.slug)
            .collect();
        // Only the seeded public root folder remains visible.
        assert_eq!(public, vec!["default".to_string()]);

        let all = store.list(true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn ensure_token_is_idempotent() {
        let (_tmp, store) = folder_store();
        let folder = store.create("Trip").unwrap();

        let first = store.ensure_shared_token(folder.id).unwrap();
        let second = store.ensure_shared_token(folder.id).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn regenerate_rotates_token_and_resets_views() {
        let (_tmp, store) = folder_store();
        let folder = store.create("Trip").unwrap();
        let first = store.ensure_shared_token(folder.id).unwrap();

        store.increment_shared_views(folder.id).unwrap();
        store.increment_shared_views(folder.id).unwrap();
        assert_eq!(store.get_by_id(folder.id).unwrap().shared_views, 2);

        let rotated = store.regenerate_shared_token(folder.id).unwrap();
        assert_ne!(rotated.shared_token.as_deref(), Some(first.as_str()));
        assert_eq!(rotated.shared_views, 0);
    }

    #[test]
    fn visibility_shared_issues_token_once() {
        let (_tmp, store) = folder_store();
        let folder = store.create("Trip").unwrap();
        assert!(folder.shared_token.is_none());

        let shared = store.update_visibility(folder.id, Visibility::Shared).unwrap();
        let token = shared.shared_token.clone().unwrap();

        // Re-asserting the same visibility must not rotate the token.
        let again = store.update_visibility(folder.id, Visibility::Shared).unwrap();
        assert_eq!(again.shared_token.as_deref(), Some(token.as_str()));

        // Switching away preserves the token for later reuse.
        let private = store
            .update_visibility(folder.id, Visibility::Private)
            .unwrap();
        assert_eq!(private.shared_token.as_deref(), Some(token.as_str()));
    }

    #[test]
    fn token_lookup_finds_collection() {
        let (_tmp, store) = folder_store();
        let folder = store.create("Trip").unwrap();
        let token = store.ensure_shared_token(folder.id).unwrap();

        let found = store.get_by_token(&token).unwrap();
        assert_eq!(found.id, folder.id);
        assert!(matches!(
            store.get_by_token("nope"),
            Err(CollectionError::Db(rusqlite::Error::QueryReturnedNoRows))
        ));
    }

    #[test]
    fn rename_moves_directory_and_updates_slug() {
        let (tmp, store) = folder_store();
        let folder = store.create("Trip").unwrap();
        std::fs::write(tmp.path().join("trip/a.jpg"), b"x").unwrap();

        let renamed = store.rename(folder.id, "Holiday").unwrap();
        assert_eq!(renamed.slug, "holiday");
        assert_eq!(renamed.path, "holiday");
        assert!(tmp.path().join("holiday/a.jpg").exists());
        assert!(!tmp.path().join("trip").exists());
    }

    #[test]
    fn rename_without_slug_change_keeps_directory() {
        let (tmp, store) = folder_store();
        let folder = store.create("trip").unwrap();

        // Same slug, different display name.
        let renamed = store.rename(folder.id, "TRIP").unwrap();
        assert_eq!(renamed.slug, "trip");
        assert_eq!(renamed.name, "TRIP");
        assert!(tmp.path().join("trip").is_dir());
    }

    #[test]
    fn rename_refuses_existing_directory() {
        let (tmp, store) = folder_store();
        let folder = store.create("Trip").unwrap();
        std::fs::create_dir(tmp.path().join("holiday")).unwrap();

        assert!(matches!(
            store.rename(folder.id, "Holiday"),
            Err(CollectionError::NameExists)
        ));
        assert!(tmp.path().join("trip").is_dir());
    }

    #[test]
    fn root_folder_is_protected() {
        let (_tmp, store) = folder_store();
        let root = store.get_by_slug("default").unwrap();

        assert!(matches!(
            store.rename(root.id, "Other"),
            Err(CollectionError::Protected)
        ));
        assert!(matches!(
            store.delete(root.id),
            Err(CollectionError::Protected)
        ));
    }

    #[test]
    fn delete_removes_row_and_directory() {
        let (tmp, store) = folder_store();
        let folder = store.create("Trip").unwrap();
        std::fs::write(tmp.path().join("trip/a.jpg"), b"x").unwrap();

        store.delete(folder.id).unwrap();
        assert!(!tmp.path().join("trip").exists());
        assert!(matches!(
            store.get_by_id(folder.id),
            Err(CollectionError::Db(rusqlite::Error::QueryReturnedNoRows))
        ));
    }

    #[test]
    fn groups_are_always_deletable() {
        let (tmp, store) = group_store();
        let group = store.create("Konkurs").unwrap();
        assert!(tmp.path().join("konkurs").is_dir());

        store.delete(group.id).unwrap();
        assert!(!tmp.path().join("konkurs").exists());
    }

    #[test]
    fn rename_recreates_missing_directory() {
        let (tmp, store) = group_store();
        let group = store.create("Konkurs").unwrap();
        std::fs::remove_dir(tmp.path().join("konkurs")).unwrap();

        let renamed = store.rename(group.id, "Zawody").unwrap();
        assert_eq!(renamed.slug, "zawody");
        assert!(tmp.path().join("zawody").is_dir());
    }
}
