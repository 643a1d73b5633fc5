//! File-backed snapshot provider.
//!
//! Reads `<dir>/<user_id>.json` documents. The same documents back the
//! entity document source used by the outbox embedding pipeline.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EntityKind, UserStateSnapshot};
use crate::domain::ports::{EntityDocument, EntityDocumentSource, SnapshotProvider};

/// Snapshot provider reading one JSON document per user from a directory.
#[derive(Debug, Clone)]
pub struct JsonDirSnapshotProvider {
    directory: PathBuf,
}

impl JsonDirSnapshotProvider {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Directory holding the snapshot documents.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, user_id: Uuid) -> PathBuf {
        self.directory.join(format!("{user_id}.json"))
    }

    /// Write a snapshot document, replacing any existing one.
    pub async fn save(&self, snapshot: &UserStateSnapshot) -> DomainResult<()> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| DomainError::external("snapshot-dir", e.to_string()))?;
        let json = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(self.path_for(snapshot.user_id), json)
            .await
            .map_err(|e| DomainError::external("snapshot-dir", e.to_string()))
    }
}

#[async_trait]
impl SnapshotProvider for JsonDirSnapshotProvider {
    async fn build_snapshot(&self, user_id: Uuid) -> DomainResult<UserStateSnapshot> {
        let path = self.path_for(user_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(DomainError::UserNotFound(user_id)),
            Err(e) => return Err(DomainError::external("snapshot-dir", format!("{}: {e}", path.display()))),
        };

        let mut document: serde_json::Value = serde_json::from_slice(&bytes)?;
        if let Some(object) = document.as_object_mut() {
            // Stored state is live data; the capture time is the read time
            object
                .entry("captured_at")
                .or_insert_with(|| serde_json::Value::String(Utc::now().to_rfc3339()));
            object
                .entry("user_id")
                .or_insert_with(|| serde_json::Value::String(user_id.to_string()));
        }

        let snapshot: UserStateSnapshot = serde_json::from_value(document)?;
        if snapshot.user_id != user_id {
            return Err(DomainError::ValidationFailed(format!(
                "snapshot {} belongs to user {}",
                path.display(),
                snapshot.user_id
            )));
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl EntityDocumentSource for JsonDirSnapshotProvider {
    async fn load(&self, user_id: Uuid, entity_type: EntityKind, entity_id: Uuid) -> DomainResult<Option<EntityDocument>> {
        let snapshot = match self.build_snapshot(user_id).await {
            Ok(snapshot) => snapshot,
            Err(DomainError::UserNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(render_entity(&snapshot, entity_type, entity_id).map(|text| EntityDocument {
            user_id,
            entity_type,
            entity_id,
            text,
        }))
    }
}

/// Plain-text rendering of one entity for embedding.
pub fn render_entity(snapshot: &UserStateSnapshot, kind: EntityKind, id: Uuid) -> Option<String> {
    match kind {
        EntityKind::Goal => snapshot.goals.iter().find(|g| g.id == id).map(|g| {
            let mut text = format!("Goal: {}. Status {:?}, {:.0}% complete.", g.title, g.status, g.progress * 100.0);
            if let Some(target) = g.target_date {
                text.push_str(&format!(" Target date {target}."));
            }
            text
        }),
        EntityKind::Task => snapshot.tasks.iter().find(|t| t.id == id).map(|t| {
            let mut text = format!("Task: {}. Status {:?}, priority {}.", t.title, t.status, t.priority);
            if let Some(due) = t.due_date {
                text.push_str(&format!(" Due {due}."));
            }
            if t.reschedule_count > 0 {
                text.push_str(&format!(" Rescheduled {} times.", t.reschedule_count));
            }
            text
        }),
        EntityKind::Habit => snapshot.habits.iter().find(|h| h.id == id).map(|h| {
            format!(
                "Habit: {}. Current streak {} days (best {}), adherence {:.0}%.",
                h.title,
                h.current_streak,
                h.longest_streak,
                h.adherence_rate * 100.0
            )
        }),
        EntityKind::Project => snapshot.projects.iter().find(|p| p.id == id).map(|p| {
            format!("Project: {}. Status {:?}, {:.0}% complete.", p.title, p.status, p.progress * 100.0)
        }),
        EntityKind::Experiment => snapshot.experiments.iter().find(|e| e.id == id).map(|e| {
            let mut text = format!("Experiment: {}. Status {:?}.", e.title, e.status);
            if let Some(hypothesis) = &e.hypothesis {
                text.push_str(&format!(" Hypothesis: {hypothesis}."));
            }
            text
        }),
        EntityKind::CheckIn => snapshot.check_ins.iter().find(|c| c.id == id).map(|c| {
            let mut text = format!("Check-in on {}: energy {}/10.", c.created_at.date_naive(), c.energy_level);
            if let Some(note) = &c.note {
                text.push(' ');
                text.push_str(note);
            }
            text
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{HabitSnapshot, UserStateSnapshot};

    fn habit(title: &str) -> HabitSnapshot {
        HabitSnapshot {
            id: Uuid::new_v4(),
            title: title.to_string(),
            goal_id: None,
            current_streak: 4,
            longest_streak: 12,
            adherence_rate: 0.5,
            last_completed_on: None,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_directory() {
        let dir = tempfile::tempdir().unwrap();
        let provider = JsonDirSnapshotProvider::new(dir.path());
        let user = Uuid::new_v4();
        let mut snapshot = UserStateSnapshot::empty(user, Utc::now());
        snapshot.habits.push(habit("Evening walk"));
        provider.save(&snapshot).await.unwrap();

        let loaded = provider.build_snapshot(user).await.unwrap();
        assert_eq!(loaded.habits.len(), 1);

        let doc = provider.load(user, EntityKind::Habit, snapshot.habits[0].id).await.unwrap().unwrap();
        assert!(doc.text.starts_with("Habit: Evening walk."));
        assert!(provider.load(user, EntityKind::Habit, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = JsonDirSnapshotProvider::new(dir.path());
        let user = Uuid::new_v4();
        assert!(matches!(
            provider.build_snapshot(user).await,
            Err(DomainError::UserNotFound(id)) if id == user
        ));
        assert!(provider.load(user, EntityKind::Task, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capture_time_defaults_to_read_time() {
        let dir = tempfile::tempdir().unwrap();
        let user = Uuid::new_v4();
        let document = serde_json::json!({
            "profile": {"user_id": user, "display_name": "Sam"},
            "tasks": []
        });
        std::fs::write(dir.path().join(format!("{user}.json")), document.to_string()).unwrap();

        let before = Utc::now();
        let snapshot = JsonDirSnapshotProvider::new(dir.path()).build_snapshot(user).await.unwrap();
        assert!(snapshot.captured_at >= before - chrono::Duration::seconds(1));
        assert_eq!(snapshot.profile.display_name.as_deref(), Some("Sam"));
    }
}
