// src/history.rs

use crate::error::Result;
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Chat id whose history is wiped each time a REPL starts on it.
pub const TEMP_CHAT_ID: &str = "temp";

/// One (role, content) pair. Roles are `system`, `user` or `assistant`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}

/// File-backed, session-keyed chat history: one JSON array per chat id.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
    max_length: usize,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>, max_length: usize) -> Self {
        Self { dir: dir.into(), max_length }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, chat_id: &str) -> Result<PathBuf> {
        let valid = !chat_id.is_empty()
            && chat_id != "."
            && chat_id != ".."
            && !chat_id.contains(['/', '\\']);
        if !valid {
            return Err(anyhow!("Invalid chat id '{}'", chat_id));
        }
        Ok(self.dir.join(chat_id))
    }

    pub fn exists(&self, chat_id: &str) -> bool {
        self.path_for(chat_id).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Ordered turns of a chat; empty when the chat has never been written.
    pub fn load(&self, chat_id: &str) -> Result<Vec<Turn>> {
        let path = self.path_for(chat_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read chat history {:?}", path))?;
        let turns = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupted chat history {:?}", path))?;
        Ok(turns)
    }

    /// Appends turns and trims the chat to the newest `max_length` non-system
    /// turns. A leading system turn is always kept.
    pub fn append(&self, chat_id: &str, new_turns: &[Turn]) -> Result<()> {
        let path = self.path_for(chat_id)?;
        let mut turns = self.load(chat_id)?;
        turns.extend_from_slice(new_turns);

        let system = match turns.first() {
            Some(first) if first.is_system() => Some(turns.remove(0)),
            _ => None,
        };
        if turns.len() > self.max_length {
            let excess = turns.len() - self.max_length;
            debug!(chat_id, excess, "Truncating chat history");
            turns.drain(..excess);
        }
        if let Some(system) = system {
            turns.insert(0, system);
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create chat cache {:?}", self.dir))?;
        let json = serde_json::to_string_pretty(&turns).context("Failed to encode chat history")?;
        fs::write(&path, json).with_context(|| format!("Failed to write chat history {:?}", path))?;
        Ok(())
    }

    pub fn invalidate(&self, chat_id: &str) -> Result<()> {
        let path = self.path_for(chat_id)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove chat history {:?}", path))?;
        }
        Ok(())
    }

    /// Chat ids, oldest modification first.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list chat cache {:?}", self.dir))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(time) => time,
                Err(e) => {
                    warn!("Skipping {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            entries.push((modified, entry.file_name().to_string_lossy().into_owned()));
        }
        entries.sort();
        Ok(entries.into_iter().map(|(_, name)| name).collect())
    }
}
