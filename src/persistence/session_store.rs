//! Session directories with one `mappings.toml` each
//!
//! ```text
//! <root>/
//!   default/mappings.toml
//!   live/mappings.toml
//! ```

use super::{BoxFuture, MappingRepository, MappingSnapshot};
use crate::mapping::store::DEFAULT_PROFILE;
use crate::mapping::types::Mapping;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const APP_DIR: &str = "controlmapper";
const SESSIONS_DIR: &str = "sessions";
const MAPPINGS_FILE: &str = "mappings.toml";

/// TOML-backed session storage rooted at a sessions directory.
#[derive(Debug, Clone)]
pub struct TomlSessionStore {
    root: PathBuf,
    session: String,
}

impl TomlSessionStore {
    pub fn new(root: impl Into<PathBuf>, session: impl Into<String>) -> Result<Self> {
        let session = session.into();
        validate_session_name(&session)?;
        Ok(Self {
            root: root.into(),
            session,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self) -> PathBuf {
        self.root.join(&self.session)
    }

    pub fn mappings_path(&self) -> PathBuf {
        self.session_dir().join(MAPPINGS_FILE)
    }

    /// Points the store at another session. Nothing is read or written.
    pub fn switch_session(&mut self, session: impl Into<String>) -> Result<()> {
        let session = session.into();
        validate_session_name(&session)?;
        info!("Switching session {} -> {}", self.session, session);
        self.session = session;
        Ok(())
    }

    /// Names of all session directories under the root, sorted.
    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        if !tokio::fs::try_exists(&self.root)
            .await
            .map_err(|e| eyre!("Failed to check if sessions directory exists: {}", e))?
        {
            debug!("Sessions directory does not exist, no sessions available");
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| eyre!("Failed to read sessions directory: {}", e))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| eyre!("Failed to read directory entry: {}", e))?
        {
            let path = entry.path();
            let is_dir = tokio::fs::metadata(&path)
                .await
                .map_err(|e| eyre!("Failed to get metadata for {}: {}", path.display(), e))?
                .is_dir();

            if is_dir {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    sessions.push(name.to_string());
                }
            }
        }

        sessions.sort();
        Ok(sessions)
    }

    /// Removes a session directory. The session the store currently points
    /// at cannot be deleted.
    pub async fn delete_session(&self, session: &str) -> Result<()> {
        validate_session_name(session)?;
        if session == self.session {
            return Err(eyre!("Cannot delete the active session: {}", session));
        }

        let path = self.root.join(session);
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| eyre!("Failed to check if session directory exists: {}", e))?
        {
            return Err(eyre!("Session directory does not exist: {}", session));
        }

        tokio::fs::remove_dir_all(&path)
            .await
            .map_err(|e| eyre!("Failed to delete session directory: {}", e))?;

        info!("Session {} deleted successfully", session);
        Ok(())
    }

    pub async fn save_snapshot(&self, snapshot: &MappingSnapshot) -> Result<()> {
        let dir = self.session_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| eyre!("Failed to create session directory: {}", e))?;

        let content = toml::to_string_pretty(snapshot)
            .map_err(|e| eyre!("Failed to serialize mappings: {}", e))?;

        tokio::fs::write(self.mappings_path(), content)
            .await
            .map_err(|e| eyre!("Failed to write mappings file: {}", e))?;

        info!(
            "Session {} saved successfully ({} mappings)",
            self.session,
            snapshot.mappings.len()
        );
        Ok(())
    }

    /// Reads the session's mappings. Records that cannot be decoded are
    /// skipped with a warning; a missing file yields `Ok(None)`.
    pub async fn load_snapshot(&self) -> Result<Option<MappingSnapshot>> {
        let path = self.mappings_path();
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| eyre!("Failed to check if mappings file exists: {}", e))?
        {
            warn!(
                "Mappings file does not exist for session {}, starting empty",
                self.session
            );
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| eyre!("Failed to read mappings file: {}", e))?;

        let snapshot = parse_snapshot(&content)?;
        info!(
            "Session {} loaded ({} mappings)",
            self.session,
            snapshot.mappings.len()
        );
        Ok(Some(snapshot))
    }
}

impl MappingRepository for TomlSessionStore {
    fn session(&self) -> &str {
        &self.session
    }

    fn save<'a>(&'a self, snapshot: &'a MappingSnapshot) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.save_snapshot(snapshot))
    }

    fn load(&self) -> BoxFuture<'_, Result<Option<MappingSnapshot>>> {
        Box::pin(self.load_snapshot())
    }
}

pub fn default_sessions_root() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    base.join(APP_DIR).join(SESSIONS_DIR)
}

fn validate_session_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(eyre!("Invalid session name: '{}'", name));
    }
    Ok(())
}

/// Decodes a snapshot record by record so that one bad mapping does not
/// discard the file.
fn parse_snapshot(content: &str) -> Result<MappingSnapshot> {
    let table: toml::Table =
        toml::from_str(content).map_err(|e| eyre!("Failed to parse mappings file: {}", e))?;

    let active_profile = table
        .get("active_profile")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_PROFILE)
        .to_string();

    let saved_at = table
        .get("saved_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let records = table
        .get("mappings")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut mappings = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let has_required = record
            .as_table()
            .is_some_and(|t| t.contains_key("control") && t.contains_key("target"));
        if !has_required {
            warn!("Skipping mapping #{}: missing control or target", index);
            continue;
        }

        match record.try_into::<Mapping>() {
            Ok(mapping) => mappings.push(mapping),
            Err(e) => warn!("Skipping mapping #{}: {}", index, e),
        }
    }

    Ok(MappingSnapshot {
        active_profile,
        saved_at,
        mappings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_like_session_names() {
        assert!(validate_session_name("live").is_ok());
        assert!(validate_session_name("").is_err());
        assert!(validate_session_name("..").is_err());
        assert!(validate_session_name("a/b").is_err());
    }

    #[test]
    fn malformed_records_are_skipped() {
        let content = r#"
active_profile = "live"

[[mappings]]
id = "broken"
profile = "live"

[[mappings]]
id = "m1"
profile = "live"
mapping_type = "absolute"

[mappings.control]
control_type = "midi_cc"
device_id = "d1"
control_id = "176_7"
input_min = 0.0
input_max = 127.0

[mappings.target]
type = "widget"
node_id = "3"
widget_name = "cfg"
"#;

        let snapshot = parse_snapshot(content).unwrap();
        assert_eq!(snapshot.active_profile, "live");
        assert_eq!(snapshot.mappings.len(), 1);
        assert_eq!(snapshot.mappings[0].id.as_str(), "m1");
        assert_eq!(
            snapshot.mappings[0].mapping_type,
            crate::mapping::types::MappingType::Direct
        );
    }

    #[test]
    fn unknown_mapping_type_falls_back_to_direct() {
        let content = r#"
[[mappings]]
mapping_type = "scratch"
control = { control_type = "gamepad_button", device_id = "pad", control_id = "a", input_min = 0.0, input_max = 1.0 }
target = { type = "command", command_id = "queue" }
"#;
        let snapshot = parse_snapshot(content).unwrap();
        assert_eq!(snapshot.active_profile, DEFAULT_PROFILE);
        assert_eq!(
            snapshot.mappings[0].mapping_type,
            crate::mapping::types::MappingType::Direct
        );
    }
}
