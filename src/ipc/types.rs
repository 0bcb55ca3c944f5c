use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::LedgerConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: LedgerConfig,
}

impl AppState {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            workspace: None,
            db: None,
            config,
        }
    }

    /// Opens (creating if needed) the workspace database and makes it current.
    pub fn open_workspace(&mut self, path: PathBuf) -> anyhow::Result<()> {
        let conn = crate::db::open_db(&path)?;
        tracing::info!(workspace = %path.display(), "opened workspace");
        self.workspace = Some(path);
        self.db = Some(conn);
        Ok(())
    }
}
