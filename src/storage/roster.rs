use crate::common::{AttendanceError, Result};
use crate::storage::embedding_store::IdentityKey;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub identity: IdentityKey,
    pub display_name: String,
    #[serde(default)]
    pub status: String,
}

/// Display metadata for identity keys. Only read for reporting and for
/// mapping bulk-enrollment folder names to keys.
pub trait Roster {
    fn lookup(&self, identity: &IdentityKey) -> Option<RosterEntry>;

    /// Matches an identity key exactly, then a display name ignoring case.
    fn find(&self, key_or_name: &str) -> Option<RosterEntry>;
}

#[derive(Debug, Clone, Default)]
pub struct JsonRoster {
    entries: Vec<RosterEntry>,
}

impl JsonRoster {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self { entries }
    }

    /// Loads a JSON array of entries. A missing file is an empty roster.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No roster at {}, names will show as identity keys", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let entries: Vec<RosterEntry> = serde_json::from_str(&contents)
            .map_err(|e| AttendanceError::Storage(format!("Invalid roster {}: {}", path.display(), e)))?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Display name for reports, falling back to the key itself.
    pub fn display_name(&self, identity: &IdentityKey) -> String {
        self.lookup(identity)
            .map(|e| e.display_name)
            .unwrap_or_else(|| identity.to_string())
    }
}

impl Roster for JsonRoster {
    fn lookup(&self, identity: &IdentityKey) -> Option<RosterEntry> {
        self.entries.iter().find(|e| &e.identity == identity).cloned()
    }

    fn find(&self, key_or_name: &str) -> Option<RosterEntry> {
        let wanted = key_or_name.trim();
        self.entries
            .iter()
            .find(|e| e.identity.as_str() == wanted)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| e.display_name.trim().eq_ignore_ascii_case(wanted))
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_by_key_then_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        fs::write(
            &path,
            r#"[
                {"identity": "s-001", "display_name": "Ada Lovelace", "status": "active"},
                {"identity": "s-002", "display_name": "Alan Turing"}
            ]"#,
        )
        .unwrap();

        let roster = JsonRoster::load(&path).unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.find("s-002").unwrap().display_name, "Alan Turing");
        assert_eq!(roster.find("ada lovelace").unwrap().identity, IdentityKey::from("s-001"));
        assert!(roster.find("Grace Hopper").is_none());
        assert_eq!(roster.display_name(&"s-999".into()), "s-999");
    }

    #[test]
    fn missing_roster_is_empty() {
        let roster = JsonRoster::load(Path::new("/nonexistent/roster.json")).unwrap();
        assert!(roster.is_empty());
    }
}
