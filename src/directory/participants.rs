//! Participant Directory
//!
//! In-Memory Verzeichnis aller Teilnehmer, die an Video-Terminen teilnehmen
//! können. Die Engine liest nur Snapshots; einzig der Online-Status wird
//! von außen (Signaling) aktualisiert.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Participant not found: {0}")]
    NotFound(String),

    #[error("Invalid participant list: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// PARTICIPANT
// ============================================================================

/// Rolle eines Teilnehmers im Portal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Student,
    Officer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Student => f.pad("Student"),
            Role::Officer => f.pad("Officer"),
        }
    }
}

/// Unveränderlicher Snapshot eines Teilnehmers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(rename = "isOnline")]
    pub is_online: bool,
    #[serde(rename = "avatarRef", default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            is_online: true,
            avatar_ref: None,
        }
    }

    /// Gleicher Teilnehmer mit anderem Online-Status
    pub fn with_online(mut self, is_online: bool) -> Self {
        self.is_online = is_online;
        self
    }
}

// ============================================================================
// DIRECTORY
// ============================================================================

/// Thread-safe Teilnehmer-Verzeichnis
#[derive(Debug, Default)]
pub struct ParticipantDirectory {
    entries: RwLock<HashMap<String, Participant>>,
}

impl ParticipantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_participants(participants: impl IntoIterator<Item = Participant>) -> Self {
        let entries = participants
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Lädt eine JSON-Liste von Teilnehmern
    pub fn from_json_str(json: &str) -> Result<Self, DirectoryError> {
        let participants: Vec<Participant> = serde_json::from_str(json)?;
        tracing::info!("Loaded {} participants", participants.len());
        Ok(Self::from_participants(participants))
    }

    /// Fügt einen Teilnehmer hinzu oder ersetzt ihn
    pub fn upsert(&self, participant: Participant) {
        self.entries
            .write()
            .insert(participant.id.clone(), participant);
    }

    pub fn get(&self, id: &str) -> Result<Participant, DirectoryError> {
        self.entries
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))
    }

    /// Alle Teilnehmer, nach Namen sortiert
    pub fn all(&self) -> Vec<Participant> {
        let mut all: Vec<Participant> = self.entries.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Alle aktuell erreichbaren Teilnehmer
    pub fn online(&self) -> Vec<Participant> {
        self.all().into_iter().filter(|p| p.is_online).collect()
    }

    /// Live Online-Status, `None` wenn unbekannt
    pub fn presence(&self, id: &str) -> Option<bool> {
        self.entries.read().get(id).map(|p| p.is_online)
    }

    pub fn set_online_status(&self, id: &str, is_online: bool) -> Result<(), DirectoryError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))?;
        entry.is_online = is_online;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParticipantDirectory {
        ParticipantDirectory::from_participants([
            Participant::new("p2", "Omar", Role::Officer).with_online(false),
            Participant::new("p1", "Ahmed", Role::Student),
        ])
    }

    #[test]
    fn test_all_sorted_by_name() {
        let dir = sample();
        let names: Vec<_> = dir.all().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Ahmed", "Omar"]);
        assert_eq!(dir.online().len(), 1);
    }

    #[test]
    fn test_online_status() {
        let dir = sample();
        assert_eq!(dir.presence("p2"), Some(false));

        dir.set_online_status("p2", true).unwrap();
        assert_eq!(dir.presence("p2"), Some(true));
        assert!(dir.get("p2").unwrap().is_online);

        assert!(matches!(
            dir.set_online_status("ghost", true),
            Err(DirectoryError::NotFound(_))
        ));
        assert_eq!(dir.presence("ghost"), None);
    }

    #[test]
    fn test_load_from_json() {
        let dir = ParticipantDirectory::from_json_str(
            r#"[
                {"id": "s1", "name": "Dana", "role": "Student", "isOnline": true},
                {"id": "o1", "name": "Mona", "role": "Officer", "isOnline": false, "avatarRef": "mona.png"}
            ]"#,
        )
        .unwrap();

        assert_eq!(dir.len(), 2);
        let mona = dir.get("o1").unwrap();
        assert_eq!(mona.role, Role::Officer);
        assert_eq!(mona.avatar_ref.as_deref(), Some("mona.png"));

        assert!(matches!(
            ParticipantDirectory::from_json_str(r#"[{"id": "x", "role": "Teacher"}]"#),
            Err(DirectoryError::Parse(_))
        ));
    }
}
