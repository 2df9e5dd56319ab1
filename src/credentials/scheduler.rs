//! Per-vendor, per-model scheduling logic for the Credential Store (C4).
//!
//! No IO, no locks: this is the pure data structure the credential actor
//! wraps. One `CredentialManager` instance exists per vendor family.

use crate::model_catalog::ModelCapabilities;
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet, VecDeque, hash_map::Entry},
    time::{Duration, Instant},
};

pub type CredentialId = u64;
pub type ModelIndex = usize;

/// A stored credential plus the dynamic capability bitset tracking which
/// models it's currently allowed to serve.
#[derive(Debug, Clone)]
pub struct RuntimeCredential<C> {
    pub inner: C,
    pub caps: ModelCapabilities,
}

impl<C> RuntimeCredential<C> {
    pub fn new(inner: C, initial_caps: ModelCapabilities) -> Self {
        Self { inner, caps: initial_caps }
    }
}

#[derive(Debug, Clone)]
pub struct Lease<C> {
    pub id: CredentialId,
    pub credential: C,
}

#[derive(Debug, Default)]
pub struct AssignmentResult<C> {
    pub assigned: Option<Lease<C>>,
    pub refresh_ids: Vec<CredentialId>,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct CooldownTicket(Reverse<Instant>, CredentialId, ModelIndex);

/// Core scheduling logic for one vendor family's credential pool: per-model
/// round-robin queues, a cooldown "waiting room" ordered by expiry, and a
/// refreshing set that pulls a credential out of rotation while its token is
/// being renewed.
pub struct CredentialManager<C> {
    creds: HashMap<CredentialId, RuntimeCredential<C>>,
    queues: Vec<VecDeque<CredentialId>>,
    waiting_room: BinaryHeap<CooldownTicket>,
    cooldown_map: HashMap<(CredentialId, ModelIndex), Instant>,
    refreshing: HashSet<CredentialId>,
}

impl<C: Clone> CredentialManager<C> {
    pub fn new(model_count: usize) -> Self {
        Self {
            creds: HashMap::new(),
            queues: vec![VecDeque::new(); model_count],
            waiting_room: BinaryHeap::new(),
            cooldown_map: HashMap::new(),
            refreshing: HashSet::new(),
        }
    }

    pub fn add_credential(&mut self, id: CredentialId, cred: C, initial_caps_bits: u64) {
        let initial_caps = ModelCapabilities::from_bits(initial_caps_bits);
        let caps = self.creds.get(&id).map(|c| c.caps).unwrap_or(initial_caps);

        self.creds.insert(id, RuntimeCredential::new(cred, caps));
        self.refreshing.remove(&id);

        for (index, queue) in self.queues.iter_mut().enumerate() {
            if caps.supports(index) && !queue.contains(&id) {
                queue.push_back(id);
            }
        }
    }

    fn index_from_mask(&self, model_mask: u64) -> Option<ModelIndex> {
        if model_mask == 0 || (model_mask & (model_mask - 1)) != 0 {
            return None;
        }
        let index = model_mask.trailing_zeros() as usize;
        (index < self.queues.len()).then_some(index)
    }

    pub fn mark_refreshing(&mut self, id: CredentialId) {
        self.refreshing.insert(id);
        self.clear_cooldowns_for(id);
    }

    pub fn mark_model_unsupported(&mut self, id: CredentialId, model_mask: u64) -> Option<(u64, u64)> {
        if model_mask == 0 {
            return None;
        }
        let cred = self.creds.get_mut(&id)?;
        let before = cred.caps.bits();
        cred.caps.disable_mask(model_mask);
        let after = cred.caps.bits();
        Some((before, after))
    }

    pub fn delete_credential(&mut self, id: CredentialId) {
        self.creds.remove(&id);
        self.refreshing.remove(&id);
        self.clear_cooldowns_for(id);
    }

    pub fn report_rate_limit(&mut self, id: CredentialId, model_mask: u64, cooldown: Duration) {
        let Some(model_index) = self.index_from_mask(model_mask) else {
            return;
        };
        let deadline = Instant::now() + cooldown;
        self.cooldown_map.insert((id, model_index), deadline);
        self.waiting_room.push(CooldownTicket(Reverse(deadline), id, model_index));
    }

    pub fn get_full_credential_copy(&self, id: CredentialId) -> Option<C> {
        self.creds.get(&id).map(|c| c.inner.clone())
    }

    pub fn contains(&self, id: CredentialId) -> bool {
        self.creds.contains_key(&id)
    }

    pub fn is_refreshing(&self, id: CredentialId) -> bool {
        self.refreshing.contains(&id)
    }

    pub fn total_creds(&self) -> usize {
        self.creds.len()
    }

    pub fn refreshing_len(&self) -> usize {
        self.refreshing.len()
    }

    pub fn cooldown_len(&self) -> usize {
        self.cooldown_map.len()
    }

    pub fn queue_len(&self, model_mask: u64) -> usize {
        self.index_from_mask(model_mask)
            .and_then(|i| self.queues.get(i).map(|q| q.len()))
            .unwrap_or(0)
    }

    /// Picks the next non-cooling, non-refreshing credential that carries a
    /// live (unexpired) token for `model_mask`. Credentials whose token is
    /// missing/expired are returned via `refresh_ids` instead of `assigned`.
    pub fn get_assigned(
        &mut self,
        model_mask: u64,
        is_expired: impl Fn(&C) -> bool,
        has_token: impl Fn(&C) -> bool,
    ) -> AssignmentResult<C> {
        self.process_waiting_room();

        let mut result = AssignmentResult::default();
        let Some(model_index) = self.index_from_mask(model_mask) else {
            return result;
        };

        while let Some(id) = self.queues.get_mut(model_index).and_then(|q| q.pop_front()) {
            let Some(cred) = self.creds.get(&id) else {
                continue;
            };
            if !cred.caps.supports(model_index) {
                continue;
            }
            if self.refreshing.contains(&id) || self.is_model_cooling(id, model_index) {
                continue;
            }
            if is_expired(&cred.inner) || !has_token(&cred.inner) {
                result.refresh_ids.push(id);
                continue;
            }

            let credential = cred.inner.clone();
            if let Some(queue) = self.queues.get_mut(model_index) {
                queue.push_back(id);
            }
            result.assigned = Some(Lease { id, credential });
            return result;
        }
        result
    }

    fn process_waiting_room(&mut self) {
        let now = Instant::now();
        while self.waiting_room.peek().is_some_and(|t| (t.0).0 <= now) {
            let CooldownTicket(Reverse(ticket_deadline), id, model_index) =
                self.waiting_room.pop().expect("peek guaranteed existence");

            if let Entry::Occupied(entry) = self.cooldown_map.entry((id, model_index)) {
                if ticket_deadline >= *entry.get() {
                    let ((reclaimed_id, reclaimed_index), _) = entry.remove_entry();
                    if let Some(queue) = self.queues.get_mut(reclaimed_index) {
                        queue.push_back(reclaimed_id);
                    }
                }
            }
        }
    }

    fn is_model_cooling(&self, id: CredentialId, model_index: ModelIndex) -> bool {
        self.cooldown_map
            .get(&(id, model_index))
            .is_some_and(|deadline| Instant::now() < *deadline)
    }

    fn clear_cooldowns_for(&mut self, id: CredentialId) {
        self.cooldown_map.retain(|(cid, _), _| *cid != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robins_across_credentials() {
        let mut mgr = CredentialManager::<&'static str>::new(2);
        mgr.add_credential(1, "a", 0b11);
        mgr.add_credential(2, "b", 0b11);

        let a1 = mgr.get_assigned(0b01, |_| false, |_| true);
        let a2 = mgr.get_assigned(0b01, |_| false, |_| true);
        assert_ne!(a1.assigned.unwrap().id, a2.assigned.unwrap().id);
    }

    #[test]
    fn cooldown_removes_credential_until_expiry() {
        let mut mgr = CredentialManager::<&'static str>::new(1);
        mgr.add_credential(1, "a", 0b1);
        mgr.report_rate_limit(1, 0b1, Duration::from_secs(3600));
        let assignment = mgr.get_assigned(0b1, |_| false, |_| true);
        assert!(assignment.assigned.is_none());
    }

    #[test]
    fn expired_token_requests_refresh_instead_of_assignment() {
        let mut mgr = CredentialManager::<&'static str>::new(1);
        mgr.add_credential(1, "a", 0b1);
        let assignment = mgr.get_assigned(0b1, |_| true, |_| true);
        assert!(assignment.assigned.is_none());
        assert_eq!(assignment.refresh_ids, vec![1]);
    }
}
