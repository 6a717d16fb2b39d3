//! Persona state — who the companion is right now.
//!
//! Mood and relationship are continuous dimensions nudged by deltas after
//! each turn; context assembly reads a fresh snapshot at the start of every
//! turn so the system message always reflects the current state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Current emotional state, as continuous dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodSnapshot {
    /// Negative to positive, [-1.0, 1.0]
    pub valence: f32,

    /// Calm to energized, [0.0, 1.0]
    pub arousal: f32,

    /// A short label for the prevailing stance (e.g., "playful", "pensive")
    pub stance: String,
}

impl Default for MoodSnapshot {
    fn default() -> Self {
        Self {
            valence: 0.2,
            arousal: 0.4,
            stance: "warm".into(),
        }
    }
}

/// How far the relationship has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStage {
    New,
    Warming,
    Close,
    Intimate,
}

impl std::fmt::Display for RelationshipStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::New => "new",
            Self::Warming => "warming",
            Self::Close => "close",
            Self::Intimate => "intimate",
        };
        write!(f, "{label}")
    }
}

/// Current relationship state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSnapshot {
    /// [0.0, 1.0]
    pub closeness: f32,

    /// [0.0, 1.0]
    pub trust: f32,

    /// [0.0, 1.0]
    pub flirtation: f32,

    pub stage: RelationshipStage,
}

impl Default for RelationshipSnapshot {
    fn default() -> Self {
        Self {
            closeness: 0.1,
            trust: 0.1,
            flirtation: 0.0,
            stage: RelationshipStage::New,
        }
    }
}

/// Everything the system message needs about the persona, fetched fresh
/// once per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaSnapshot {
    /// The base persona description
    pub persona_text: String,

    pub mood: MoodSnapshot,

    pub relationship: RelationshipSnapshot,

    /// Standing beliefs the companion holds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub beliefs: Vec<String>,

    /// Active goals
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub goals: Vec<String>,
}

/// A nudge to mood after a turn. Fields are added to the current values
/// and clamped by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoodDelta {
    #[serde(default)]
    pub valence: f32,

    #[serde(default)]
    pub arousal: f32,

    /// Replace the stance label when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stance: Option<String>,
}

/// A nudge to relationship dimensions after a turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipDelta {
    #[serde(default)]
    pub closeness: f32,

    #[serde(default)]
    pub trust: f32,

    #[serde(default)]
    pub flirtation: f32,
}

/// The persona store boundary.
#[async_trait]
pub trait PersonaStore: Send + Sync {
    /// A fresh snapshot of the full persona state.
    async fn snapshot(&self) -> std::result::Result<PersonaSnapshot, StoreError>;

    /// Apply a mood delta; returns the clamped result.
    async fn update_mood(
        &self,
        delta: MoodDelta,
    ) -> std::result::Result<MoodSnapshot, StoreError>;

    /// Apply a relationship delta; returns the clamped result, with the
    /// stage recomputed from the new dimensions.
    async fn update_relationship(
        &self,
        delta: RelationshipDelta,
    ) -> std::result::Result<RelationshipSnapshot, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_ordering() {
        assert!(RelationshipStage::New < RelationshipStage::Warming);
        assert!(RelationshipStage::Close < RelationshipStage::Intimate);
    }

    #[test]
    fn snapshot_serialization_skips_empty_lists() {
        let snapshot = PersonaSnapshot {
            persona_text: "Aria, a curious companion".into(),
            mood: MoodSnapshot::default(),
            relationship: RelationshipSnapshot::default(),
            beliefs: vec![],
            goals: vec![],
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("beliefs"));
        assert!(!json.contains("goals"));
    }

    #[test]
    fn mood_delta_defaults_are_neutral() {
        let delta: MoodDelta = serde_json::from_str("{}").unwrap();
        assert_eq!(delta.valence, 0.0);
        assert_eq!(delta.arousal, 0.0);
        assert!(delta.stance.is_none());
    }
}
