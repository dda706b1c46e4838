//! Entity handles and the host-side traits the speech core talks to.
//!
//! The core never owns characters. It refers to them through
//! [`EntityHandle`]s, which behave like weak references: every use goes
//! through [`EntityDirectory::host`], and a handle whose entity has been
//! destroyed simply resolves to `None`.

use crate::concept::Concept;
use crate::criteria::CriteriaSet;
use crate::expresser::Expresser;
use crate::response::{ContextScope, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A weak, generation-checked reference to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityHandle {
    index: u32,
    serial: u32,
}

impl EntityHandle {
    pub fn new(index: u32, serial: u32) -> Self {
        Self { index, serial }
    }

    /// Slot index, stable while the entity lives.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot; bumped when the slot is reused.
    pub fn serial(&self) -> u32 {
        self.serial
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.index, self.serial)
    }
}

/// A point in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Which speech floor a character competes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Allegiance {
    #[default]
    Friend,
    Foe,
}

impl fmt::Display for Allegiance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allegiance::Friend => write!(f, "friend"),
            Allegiance::Foe => write!(f, "foe"),
        }
    }
}

/// Whether a character is currently bound to a scripted scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SceneState {
    /// Not in any scene.
    #[default]
    Idle,
    /// Playing an auto-generated speech scene that may be cut off.
    Interruptible,
    /// Bound to an instanced scripted scene that must not be broken.
    Locked,
}

/// A character that can host an [`Expresser`].
///
/// Implemented by whatever concrete entity kinds the host game has. The
/// criteria and notification hooks have empty defaults.
pub trait SpeechHost {
    fn handle(&self) -> EntityHandle;

    /// Targetable name, used by named follow-up targets.
    fn name(&self) -> &str;

    fn allegiance(&self) -> Allegiance;

    fn position(&self) -> Position;

    fn is_alive(&self) -> bool {
        true
    }

    /// Players skip the primary observer's criteria.
    fn is_player(&self) -> bool {
        false
    }

    fn scene_state(&self) -> SceneState {
        SceneState::Idle
    }

    /// The expresser capability. `None` for entities that cannot speak.
    fn expresser(&self) -> Option<&Expresser>;

    fn expresser_mut(&mut self) -> Option<&mut Expresser>;

    /// Contribute this entity's own criteria.
    fn modify_or_append_criteria(&self, _criteria: &mut CriteriaSet) {}

    /// Contribute criteria derived from the already-gathered set.
    fn modify_or_append_derived_criteria(&self, _criteria: &mut CriteriaSet) {}

    /// Contribute criteria when acting as the primary observer of someone else's speech.
    fn modify_or_append_observer_criteria(&self, _criteria: &mut CriteriaSet) {}

    /// Cut off the current utterance and leave any interruptible scene.
    fn stop_speaking(&mut self) {}

    fn on_start_speaking(&mut self) {}

    fn on_spoke_concept(&mut self, _concept: &Concept, _response: &Response) {}

    /// Apply a response context to this entity, its squad or its enemy.
    fn add_context(&mut self, _scope: ContextScope, _context: &CriteriaSet) {}
}

/// Lookup service for live entities.
pub trait EntityDirectory {
    fn find_by_name(&self, name: &str) -> Option<EntityHandle>;

    fn from_index(&self, index: u32) -> Option<EntityHandle>;

    /// Resolve a handle. `None` if the entity no longer exists.
    fn host(&self, handle: EntityHandle) -> Option<&dyn SpeechHost>;

    fn host_mut(&mut self, handle: EntityHandle) -> Option<&mut dyn SpeechHost>;

    /// The entity whose perspective colors everyone else's criteria (usually the local player).
    fn primary_observer(&self) -> Option<EntityHandle> {
        None
    }

    fn is_live(&self, handle: EntityHandle) -> bool {
        self.host(handle).is_some()
    }

    /// Resolve a target token by name, falling back to an entity index when it is numeric.
    fn resolve_name_or_index(&self, token: &str) -> Option<EntityHandle> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        self.find_by_name(token).or_else(|| {
            token
                .parse::<u32>()
                .ok()
                .and_then(|index| self.from_index(index))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_distance() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(b.distance(&a), 5.0);
    }

    #[test]
    fn test_handle_identity_includes_serial() {
        assert_ne!(EntityHandle::new(3, 1), EntityHandle::new(3, 2));
        assert_eq!(EntityHandle::new(3, 1).to_string(), "#3:1");
    }
}
