use std::collections::HashMap;

use super::hypothesis::{Hypothesis, HypothesisId};

/// Dense hypothesis storage with an id -> slot map and a free-list.
///
/// Removal leaves a hole that the next insertion reuses, so slot indices of
/// surviving hypotheses never move.
#[derive(Debug, Clone, Default)]
pub struct HypothesisStore {
    slots: Vec<Option<Hypothesis>>,
    index: HashMap<HypothesisId, usize>,
    free: Vec<usize>,
}

impl HypothesisStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a hypothesis, replacing any previous one with the same id.
    pub fn insert(&mut self, hypothesis: Hypothesis) -> usize {
        let id = hypothesis.id();
        if let Some(&slot) = self.index.get(&id) {
            self.slots[slot] = Some(hypothesis);
            return slot;
        }

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(hypothesis);
                slot
            }
            None => {
                self.slots.push(Some(hypothesis));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
        slot
    }

    pub fn remove(&mut self, id: HypothesisId) -> Option<Hypothesis> {
        let slot = self.index.remove(&id)?;
        self.free.push(slot);
        self.slots[slot].take()
    }

    pub fn get(&self, id: HypothesisId) -> Option<&Hypothesis> {
        self.index
            .get(&id)
            .and_then(|&slot| self.slots[slot].as_ref())
    }

    pub fn get_mut(&mut self, id: HypothesisId) -> Option<&mut Hypothesis> {
        let slot = *self.index.get(&id)?;
        self.slots[slot].as_mut()
    }

    pub fn contains(&self, id: HypothesisId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> Vec<HypothesisId> {
        let mut ids: Vec<_> = self.index.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Hypotheses in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Hypothesis> {
        self.ids().into_iter().filter_map(move |id| self.get(id))
    }

    /// Hypotheses in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Hypothesis> {
        self.slots.iter_mut().flatten()
    }

    /// Keep the hypotheses for which `keep` holds; returns the removed ids ascending.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<HypothesisId>
    where
        F: FnMut(&Hypothesis) -> bool,
    {
        let doomed: Vec<_> = self
            .iter()
            .filter(|h| !keep(*h))
            .map(|h| h.id())
            .collect();
        for &id in &doomed {
            self.remove(id);
        }
        doomed
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.free.clear();
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }
}
