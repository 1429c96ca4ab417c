//! Per-session persistence of chapters, scripts and the frame analysis.
//!
//! Each session owns `<id>_chapters.json`, `<id>_scripts.json` and
//! `<id>_analysis.md` inside the session folder. Writes are plain
//! read-modify-write, so two writers on the same session can lose updates.

use anyhow::{Context, Result};
use log::debug;
use std::sync::Arc;

use crate::core::io::{read_json, write_json, Storage};
use crate::core::state::{Chapter, ScriptRecord};

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub struct SessionStore {
    storage: Arc<dyn Storage>,
    folder: String,
    session_id: String,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn Storage>, folder: &str, session_id: &str) -> Self {
        Self {
            storage,
            folder: folder.trim_end_matches('/').to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn path(&self, suffix: &str) -> String {
        format!("{}/{}_{}", self.folder, self.session_id, suffix)
    }

    pub async fn save_chapters(&self, chapters: &[Chapter]) -> Result<()> {
        write_json(self.storage.as_ref(), &self.path("chapters.json"), chapters).await
    }

    pub async fn load_chapters(&self) -> Result<Vec<Chapter>> {
        Ok(read_json(self.storage.as_ref(), &self.path("chapters.json"))
            .await?
            .unwrap_or_default())
    }

    /// Positions without a script yet are `None` (`null` on disk).
    pub async fn load_scripts(&self) -> Result<Vec<Option<ScriptRecord>>> {
        Ok(read_json(self.storage.as_ref(), &self.path("scripts.json"))
            .await?
            .unwrap_or_default())
    }

    pub async fn save_scripts(&self, scripts: &[Option<ScriptRecord>]) -> Result<()> {
        write_json(self.storage.as_ref(), &self.path("scripts.json"), scripts).await
    }

    pub async fn get_script(&self, index: usize) -> Result<Option<ScriptRecord>> {
        Ok(self.load_scripts().await?.into_iter().nth(index).flatten())
    }

    /// Stores `record` at `index`, padding any gap with `null`.
    pub async fn put_script(&self, index: usize, record: ScriptRecord) -> Result<()> {
        let mut scripts = self.load_scripts().await?;
        if scripts.len() <= index {
            scripts.resize(index + 1, None);
        }
        debug!(
            "Session {}: storing script {} ({})",
            self.session_id, index, record.status
        );
        scripts[index] = Some(record);
        self.save_scripts(&scripts).await
    }

    pub async fn save_analysis(&self, text: &str) -> Result<()> {
        let path = self.path("analysis.md");
        self.storage
            .write(&path, text.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path))
    }

    pub async fn load_analysis(&self) -> Result<Option<String>> {
        let path = self.path("analysis.md");
        if !self.storage.exists(&path).await? {
            return Ok(None);
        }
        let bytes = self.storage.read(&path).await?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}
