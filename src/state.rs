use std::path::{Path, PathBuf};
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::session::{SessionStore, SESSION_TTL};
use crate::collections::CollectionStore;
use crate::config::Config;
use crate::request_log::RequestLog;
use crate::submissions::SubmissionStore;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub gallery_dir: PathBuf,
    pub folders: CollectionStore,
    pub groups: CollectionStore,
    pub submissions: SubmissionStore,
    pub sessions: Arc<SessionStore>,
    pub request_log: Arc<RequestLog>,
    pub favicon: Option<PathBuf>,
}

impl AppState {
    /// Wire up the stores around an opened database. `state_dir` is where the
    /// config file lives; the database, request log, optional favicon and the
    /// submissions root sit next to it. Submissions deliberately live outside
    /// the gallery tree so the static `/images` route can never reach them.
    pub fn new(
        config: Config,
        db: DbPool,
        gallery_dir: PathBuf,
        state_dir: &Path,
    ) -> anyhow::Result<Self> {
        let submissions_dir = state_dir.join("submissions");
        std::fs::create_dir_all(&submissions_dir)?;

        let request_log = RequestLog::open(&state_dir.join("logs"))?;

        let favicon = state_dir.join("favicon.ico");
        let favicon = favicon.exists().then_some(favicon);

        Ok(Self {
            folders: CollectionStore::folders(db.clone(), gallery_dir.clone()),
            groups: CollectionStore::submission_groups(db.clone(), submissions_dir),
            submissions: SubmissionStore::new(db.clone()),
            sessions: Arc::new(SessionStore::new(SESSION_TTL)),
            request_log: Arc::new(request_log),
            config,
            db,
            gallery_dir,
            favicon,
        })
    }
}
