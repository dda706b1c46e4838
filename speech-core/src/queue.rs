//! Deferred response queue and respondent roster.
//!
//! Entries are only ever cancelled in two ways: [`ResponseQueue::remove`]
//! deletes them outright and must not be used while a dispatch sweep is
//! running, and [`ResponseQueue::remove_speech_queued_for`] quashes them by
//! invalidating their target. Quashed entries are deleted by the sweep
//! itself, so quashing is safe from inside a dispatch.
//!
//! Dispatching lives on [`crate::SpeechSystem::per_frame_dispatch`], which
//! needs the entity directory and the speak pipeline.

use crate::concept::{compare_concepts, Concept};
use crate::criteria::CriteriaSet;
use crate::entity::{EntityDirectory, EntityHandle};
use crate::target::TargetSpec;

/// A response waiting for its dispatch time.
#[derive(Debug, Clone)]
pub struct DeferredResponse {
    id: u64,
    pub concept: Concept,
    /// Criteria captured when the entry was queued.
    pub criteria: CriteriaSet,
    pub dispatch_time: f32,
    pub target: TargetSpec,
    pub issuer: Option<EntityHandle>,
}

impl DeferredResponse {
    /// Queue-assigned sequence number; later entries have larger ids.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Quashed entries are skipped and removed by the next sweep.
    pub fn is_quashed(&self) -> bool {
        self.target.is_invalid()
    }

    /// Mark the entry dead without moving it.
    pub fn quash(&mut self) {
        self.target = TargetSpec::Invalid;
    }
}

/// Pending responses plus the entities that may answer any/all requests.
#[derive(Debug, Default)]
pub struct ResponseQueue {
    entries: Vec<DeferredResponse>,
    respondents: Vec<Option<EntityHandle>>,
    next_id: u64,
}

impl ResponseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `concept` for `target` at `dispatch_time`. Returns the entry id.
    pub fn add(
        &mut self,
        concept: Concept,
        criteria: CriteriaSet,
        dispatch_time: f32,
        target: TargetSpec,
        issuer: Option<EntityHandle>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        tracing::debug!(
            concept = concept.name(),
            dispatch_time,
            recipient = %target,
            "queued response"
        );
        self.entries.push(DeferredResponse {
            id,
            concept,
            criteria,
            dispatch_time,
            target,
            issuer,
        });
        id
    }

    /// Delete every entry for `concept`, optionally only those from `issuer`.
    pub fn remove(&mut self, concept: &Concept, issuer: Option<EntityHandle>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| {
            let concept_matches = compare_concepts(&entry.concept, concept);
            let issuer_matches = issuer.is_none() || entry.issuer == issuer;
            !(concept_matches && issuer_matches)
        });
        before - self.entries.len()
    }

    /// Quash every entry addressed specifically to `speaker`.
    pub fn remove_speech_queued_for(&mut self, speaker: EntityHandle) -> usize {
        let mut quashed = 0;
        for entry in &mut self.entries {
            if entry.target.specific() == Some(speaker) {
                entry.quash();
                quashed += 1;
            }
        }
        if quashed > 0 {
            tracing::debug!(%speaker, quashed, "quashed queued speech");
        }
        quashed
    }

    /// Drop every pending entry.
    pub fn evacuate(&mut self) {
        self.entries.clear();
    }

    /// Entries still in the queue, quashed ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in dispatch-time order.
    pub fn entries(&self) -> &[DeferredResponse] {
        &self.entries
    }

    /// The id the next added entry will receive.
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub(crate) fn entry_at(&self, index: usize) -> Option<&DeferredResponse> {
        self.entries.get(index)
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> DeferredResponse {
        self.entries.remove(index)
    }

    pub(crate) fn position_of(&self, id: u64) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    pub(crate) fn sweep_quashed(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !entry.is_quashed());
        before - self.entries.len()
    }

    // =========================================================================
    // Respondent roster
    // =========================================================================

    /// Register an entity as a possible any/all respondent.
    ///
    /// Reuses an empty or stale slot when one exists. Returns `false` and
    /// warns if the entity is already registered.
    pub fn add_expresser_host(&mut self, host: EntityHandle, directory: &dyn EntityDirectory) -> bool {
        if self.respondents.contains(&Some(host)) {
            tracing::warn!(%host, "entity is already a registered respondent");
            return false;
        }
        let free_slot = self.respondents.iter().position(|slot| match slot {
            None => true,
            Some(existing) => !directory.is_live(*existing),
        });
        match free_slot {
            Some(index) => self.respondents[index] = Some(host),
            None => self.respondents.push(Some(host)),
        }
        true
    }

    /// Unregister an entity. Unknown entities are ignored.
    pub fn remove_expresser_host(&mut self, host: EntityHandle) {
        for slot in &mut self.respondents {
            if *slot == Some(host) {
                *slot = None;
            }
        }
    }

    /// Registered respondents, including ones that may since have died.
    pub fn respondents(&self) -> Vec<EntityHandle> {
        self.respondents.iter().flatten().copied().collect()
    }

    /// Roster slots, free ones included.
    pub fn roster_capacity(&self) -> usize {
        self.respondents.len()
    }
}

/// Owns the session's response queue.
///
/// The queue exists between [`ResponseQueueManager::level_init`] and
/// [`ResponseQueueManager::shutdown`].
#[derive(Debug, Default)]
pub struct ResponseQueueManager {
    queue: Option<ResponseQueue>,
}

impl ResponseQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the queue if there isn't one yet.
    pub fn level_init(&mut self) {
        if self.queue.is_none() {
            self.queue = Some(ResponseQueue::new());
        }
    }

    /// Drop all pending entries, keeping the queue and its roster.
    pub fn level_shutdown(&mut self) {
        if let Some(queue) = self.queue.as_mut() {
            queue.evacuate();
        }
    }

    /// Destroy the queue and its roster.
    pub fn shutdown(&mut self) {
        self.queue = None;
    }

    /// Whether a queue currently exists.
    pub fn is_active(&self) -> bool {
        self.queue.is_some()
    }

    pub fn queue(&self) -> Option<&ResponseQueue> {
        self.queue.as_ref()
    }

    pub fn queue_mut(&mut self) -> Option<&mut ResponseQueue> {
        self.queue.as_mut()
    }
}
