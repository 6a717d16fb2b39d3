//! Stateful persona engine — mood and relationship drift across turns.

use async_trait::async_trait;
use tokio::sync::RwLock;

use kindred_core::error::StoreError;
use kindred_core::persona::{
    MoodDelta, MoodSnapshot, PersonaSnapshot, PersonaStore, RelationshipDelta,
    RelationshipSnapshot, RelationshipStage,
};

struct PersonaState {
    persona_text: String,
    mood: MoodSnapshot,
    relationship: RelationshipSnapshot,
    beliefs: Vec<String>,
    goals: Vec<String>,
}

/// A persona store that accumulates deltas in process memory.
///
/// Dimensions are clamped to their ranges on every update; the
/// relationship stage is a pure function of the updated dimensions, so
/// it can regress when the relationship cools.
pub struct PersonaEngine {
    state: RwLock<PersonaState>,
}

impl PersonaEngine {
    pub fn new(persona_text: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(PersonaState {
                persona_text: persona_text.into(),
                mood: MoodSnapshot::default(),
                relationship: RelationshipSnapshot::default(),
                beliefs: Vec::new(),
                goals: Vec::new(),
            }),
        }
    }

    pub fn with_beliefs(self, beliefs: Vec<String>) -> Self {
        let mut state = self.state.into_inner();
        state.beliefs = beliefs;
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn with_goals(self, goals: Vec<String>) -> Self {
        let mut state = self.state.into_inner();
        state.goals = goals;
        Self {
            state: RwLock::new(state),
        }
    }
}

fn stage_for(closeness: f32, trust: f32) -> RelationshipStage {
    let depth = (closeness + trust) / 2.0;
    if depth >= 0.75 {
        RelationshipStage::Intimate
    } else if depth >= 0.5 {
        RelationshipStage::Close
    } else if depth >= 0.25 {
        RelationshipStage::Warming
    } else {
        RelationshipStage::New
    }
}

#[async_trait]
impl PersonaStore for PersonaEngine {
    async fn snapshot(&self) -> std::result::Result<PersonaSnapshot, StoreError> {
        let state = self.state.read().await;
        Ok(PersonaSnapshot {
            persona_text: state.persona_text.clone(),
            mood: state.mood.clone(),
            relationship: state.relationship.clone(),
            beliefs: state.beliefs.clone(),
            goals: state.goals.clone(),
        })
    }

    async fn update_mood(
        &self,
        delta: MoodDelta,
    ) -> std::result::Result<MoodSnapshot, StoreError> {
        let mut state = self.state.write().await;
        state.mood.valence = (state.mood.valence + delta.valence).clamp(-1.0, 1.0);
        state.mood.arousal = (state.mood.arousal + delta.arousal).clamp(0.0, 1.0);
        if let Some(stance) = delta.stance {
            state.mood.stance = stance;
        }
        Ok(state.mood.clone())
    }

    async fn update_relationship(
        &self,
        delta: RelationshipDelta,
    ) -> std::result::Result<RelationshipSnapshot, StoreError> {
        let mut state = self.state.write().await;
        let relationship = &mut state.relationship;
        relationship.closeness = (relationship.closeness + delta.closeness).clamp(0.0, 1.0);
        relationship.trust = (relationship.trust + delta.trust).clamp(0.0, 1.0);
        relationship.flirtation = (relationship.flirtation + delta.flirtation).clamp(0.0, 1.0);
        relationship.stage = stage_for(relationship.closeness, relationship.trust);
        Ok(relationship.clone())
    }
}

/// A persona store that always returns the same snapshot and ignores
/// deltas. Test wiring.
pub struct FixedPersona {
    snapshot: PersonaSnapshot,
}

impl FixedPersona {
    pub fn new(snapshot: PersonaSnapshot) -> Self {
        Self { snapshot }
    }
}

impl Default for FixedPersona {
    fn default() -> Self {
        Self::new(PersonaSnapshot {
            persona_text: "Kin, a steady test companion.".into(),
            mood: MoodSnapshot::default(),
            relationship: RelationshipSnapshot::default(),
            beliefs: Vec::new(),
            goals: Vec::new(),
        })
    }
}

#[async_trait]
impl PersonaStore for FixedPersona {
    async fn snapshot(&self) -> std::result::Result<PersonaSnapshot, StoreError> {
        Ok(self.snapshot.clone())
    }

    async fn update_mood(
        &self,
        _delta: MoodDelta,
    ) -> std::result::Result<MoodSnapshot, StoreError> {
        Ok(self.snapshot.mood.clone())
    }

    async fn update_relationship(
        &self,
        _delta: RelationshipDelta,
    ) -> std::result::Result<RelationshipSnapshot, StoreError> {
        Ok(self.snapshot.relationship.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_reflects_construction() {
        let engine = PersonaEngine::new("Aria, a curious companion")
            .with_beliefs(vec!["honesty over comfort".into()])
            .with_goals(vec!["learn what makes the user laugh".into()]);

        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(snapshot.persona_text, "Aria, a curious companion");
        assert_eq!(snapshot.beliefs.len(), 1);
        assert_eq!(snapshot.goals.len(), 1);
        assert_eq!(snapshot.relationship.stage, RelationshipStage::New);
    }

    #[tokio::test]
    async fn mood_deltas_accumulate_and_clamp() {
        let engine = PersonaEngine::new("p");

        let mood = engine
            .update_mood(MoodDelta {
                valence: 0.5,
                arousal: -1.0,
                stance: None,
            })
            .await
            .unwrap();
        assert!((mood.valence - 0.7).abs() < 1e-6);
        assert_eq!(mood.arousal, 0.0);

        let mood = engine
            .update_mood(MoodDelta {
                valence: 0.9,
                arousal: 0.0,
                stance: None,
            })
            .await
            .unwrap();
        assert_eq!(mood.valence, 1.0);
    }

    #[tokio::test]
    async fn stance_replaced_only_when_set() {
        let engine = PersonaEngine::new("p");

        let mood = engine
            .update_mood(MoodDelta {
                stance: Some("playful".into()),
                ..MoodDelta::default()
            })
            .await
            .unwrap();
        assert_eq!(mood.stance, "playful");

        let mood = engine.update_mood(MoodDelta::default()).await.unwrap();
        assert_eq!(mood.stance, "playful");
    }

    #[tokio::test]
    async fn relationship_progresses_through_stages() {
        let engine = PersonaEngine::new("p");

        // Defaults start at closeness 0.1, trust 0.1.
        let r = engine
            .update_relationship(RelationshipDelta {
                closeness: 0.3,
                trust: 0.3,
                flirtation: 0.0,
            })
            .await
            .unwrap();
        assert_eq!(r.stage, RelationshipStage::Warming);

        let r = engine
            .update_relationship(RelationshipDelta {
                closeness: 0.2,
                trust: 0.2,
                flirtation: 0.0,
            })
            .await
            .unwrap();
        assert_eq!(r.stage, RelationshipStage::Close);

        let r = engine
            .update_relationship(RelationshipDelta {
                closeness: 0.5,
                trust: 0.5,
                flirtation: 0.0,
            })
            .await
            .unwrap();
        assert_eq!(r.closeness, 1.0);
        assert_eq!(r.stage, RelationshipStage::Intimate);
    }

    #[tokio::test]
    async fn relationship_can_cool_back_down() {
        let engine = PersonaEngine::new("p");
        engine
            .update_relationship(RelationshipDelta {
                closeness: 0.6,
                trust: 0.6,
                flirtation: 0.0,
            })
            .await
            .unwrap();

        let r = engine
            .update_relationship(RelationshipDelta {
                closeness: -0.5,
                trust: -0.5,
                flirtation: 0.0,
            })
            .await
            .unwrap();
        assert_eq!(r.stage, RelationshipStage::New);
    }

    #[tokio::test]
    async fn fixed_persona_ignores_updates() {
        let persona = FixedPersona::default();
        let before = persona.snapshot().await.unwrap();

        persona
            .update_mood(MoodDelta {
                valence: 1.0,
                arousal: 1.0,
                stance: Some("frantic".into()),
            })
            .await
            .unwrap();

        let after = persona.snapshot().await.unwrap();
        assert_eq!(after.mood, before.mood);
    }
}
