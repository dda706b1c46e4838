//! Speech turn semaphores.
//!
//! A semaphore records who holds a speech floor and until when. There is
//! no queuing: acquiring always succeeds and overwrites the previous
//! holder. Contention is settled by the policy checks that consult
//! [`SpeechSemaphore::is_available`] before speaking.

use crate::entity::{Allegiance, EntityHandle};

/// A time-released, single-holder floor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeechSemaphore {
    release_time: f32,
    holder: Option<EntityHandle>,
}

impl SpeechSemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The holder is always let through; anyone else waits for the release time.
    pub fn is_available(&self, now: f32, candidate: EntityHandle) -> bool {
        match self.holder {
            None => true,
            Some(holder) if holder == candidate => true,
            Some(_) => now > self.release_time,
        }
    }

    /// Hand the floor to `holder` until `now + duration`.
    pub fn acquire(&mut self, now: f32, duration: f32, holder: EntityHandle) {
        self.release_time = now + duration;
        self.holder = Some(holder);
    }

    /// Free the floor immediately.
    pub fn release(&mut self) {
        self.release_time = 0.0;
        self.holder = None;
    }

    /// When the current holder's claim runs out.
    pub fn release_time(&self) -> f32 {
        self.release_time
    }

    /// Who last acquired the floor, until it is released.
    pub fn holder(&self) -> Option<EntityHandle> {
        self.holder
    }
}

/// The friend and foe floors for one session.
#[derive(Debug, Clone, Default)]
pub struct SpeechSemaphores {
    friends: SpeechSemaphore,
    foes: SpeechSemaphore,
}

impl SpeechSemaphores {
    pub fn new() -> Self {
        Self::default()
    }

    /// The floor for `allegiance`.
    pub fn get(&self, allegiance: Allegiance) -> &SpeechSemaphore {
        match allegiance {
            Allegiance::Friend => &self.friends,
            Allegiance::Foe => &self.foes,
        }
    }

    pub fn get_mut(&mut self, allegiance: Allegiance) -> &mut SpeechSemaphore {
        match allegiance {
            Allegiance::Friend => &mut self.friends,
            Allegiance::Foe => &mut self.foes,
        }
    }

    /// Make both floors available.
    pub fn reset(&mut self) {
        self.friends.release();
        self.foes.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> EntityHandle {
        EntityHandle::new(1, 1)
    }

    fn bob() -> EntityHandle {
        EntityHandle::new(2, 1)
    }

    #[test]
    fn test_fresh_semaphore_is_available() {
        let semaphore = SpeechSemaphore::new();
        assert!(semaphore.is_available(0.0, alice()));
        assert!(semaphore.holder().is_none());
    }

    #[test]
    fn test_holder_is_reentrant() {
        let mut semaphore = SpeechSemaphore::new();
        semaphore.acquire(10.0, 3.0, alice());

        for t in [10.0, 11.0, 12.5, 12.99] {
            assert!(semaphore.is_available(t, alice()), "holder blocked at {t}");
            assert!(!semaphore.is_available(t, bob()), "other speaker let in at {t}");
        }
    }

    #[test]
    fn test_release_time_is_exclusive() {
        let mut semaphore = SpeechSemaphore::new();
        semaphore.acquire(10.0, 3.0, alice());
        // available strictly after the release time
        assert!(!semaphore.is_available(13.0, bob()));
        assert!(semaphore.is_available(13.01, bob()));
    }

    #[test]
    fn test_last_writer_wins() {
        let mut semaphore = SpeechSemaphore::new();
        semaphore.acquire(0.0, 10.0, alice());
        semaphore.acquire(1.0, 1.0, bob());

        assert_eq!(semaphore.holder(), Some(bob()));
        assert_eq!(semaphore.release_time(), 2.0);
        assert!(!semaphore.is_available(1.5, alice()));
    }

    #[test]
    fn test_release() {
        let mut semaphore = SpeechSemaphore::new();
        semaphore.acquire(0.0, 10.0, alice());
        semaphore.release();
        assert!(semaphore.is_available(0.5, bob()));
        assert_eq!(semaphore.release_time(), 0.0);
    }

    #[test]
    fn test_floors_are_independent() {
        let mut floors = SpeechSemaphores::new();
        floors.get_mut(Allegiance::Friend).acquire(0.0, 5.0, alice());

        assert!(!floors.get(Allegiance::Friend).is_available(1.0, bob()));
        assert!(floors.get(Allegiance::Foe).is_available(1.0, bob()));

        floors.reset();
        assert!(floors.get(Allegiance::Friend).is_available(1.0, bob()));
    }
}
