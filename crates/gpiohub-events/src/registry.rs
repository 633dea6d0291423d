//! Listener registry.
//!
//! Registrations live in a map of maps keyed by category and entity id.
//! A reverse index maps each listener id to the (category, entity id) pairs
//! it is registered under, so removing everything a listener owns does not
//! scan the whole registry.
//!
//! The registry itself is not synchronized; the bus wraps it in a lock that
//! is only held while mutating or snapshotting, never while a listener runs.

use crate::listener::EventTarget;
use gpiohub_core::EventCategory;
use std::collections::{BTreeSet, HashMap};

/// Registry key below the category level.
pub type EntityId = String;

/// Identifier chosen by the listener (a group id, a websocket session...).
pub type ListenerId = String;

#[derive(Debug, Clone)]
struct Registration {
    listener_id: ListenerId,
    target: EventTarget,
}

/// Listener registry with a reverse index.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    /// Registrations per entity keep insertion order.
    listeners: HashMap<EventCategory, HashMap<EntityId, Vec<Registration>>>,
    index: HashMap<ListenerId, BTreeSet<(EventCategory, EntityId)>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target.
    ///
    /// Registering the same (category, entity id, listener id) again swaps
    /// the target in place and keeps its position. Returns `true` when an
    /// existing registration was replaced.
    pub fn register(
        &mut self,
        category: EventCategory,
        entity_id: &str,
        listener_id: &str,
        target: EventTarget,
    ) -> bool {
        let registrations = self
            .listeners
            .entry(category)
            .or_default()
            .entry(entity_id.to_string())
            .or_default();

        if let Some(existing) = registrations
            .iter_mut()
            .find(|registration| registration.listener_id == listener_id)
        {
            existing.target = target;
            return true;
        }

        registrations.push(Registration {
            listener_id: listener_id.to_string(),
            target,
        });
        self.index
            .entry(listener_id.to_string())
            .or_default()
            .insert((category, entity_id.to_string()));
        false
    }

    /// Remove registrations.
    ///
    /// - With a listener id: every registration of that listener, narrowed
    ///   to `category` and/or `entity_id` when given.
    /// - Without one: every registration under `category`, narrowed to
    ///   `entity_id` when given.
    /// - With neither a listener id nor a category nothing is removed.
    ///
    /// Returns the number of registrations removed.
    pub fn unregister(
        &mut self,
        category: Option<EventCategory>,
        entity_id: Option<&str>,
        listener_id: Option<&str>,
    ) -> usize {
        match (listener_id, category) {
            (Some(listener_id), _) => self.unregister_listener(listener_id, category, entity_id),
            (None, Some(category)) => self.unregister_category(category, entity_id),
            (None, None) => 0,
        }
    }

    fn unregister_listener(
        &mut self,
        listener_id: &str,
        category: Option<EventCategory>,
        entity_id: Option<&str>,
    ) -> usize {
        let Some(keys) = self.index.get_mut(listener_id) else {
            return 0;
        };

        let matching: Vec<_> = keys
            .iter()
            .filter(|(cat, ent)| {
                category.is_none_or(|c| c == *cat) && entity_id.is_none_or(|e| e == ent)
            })
            .cloned()
            .collect();

        for key in &matching {
            keys.remove(key);
        }
        if keys.is_empty() {
            self.index.remove(listener_id);
        }

        for (cat, ent) in &matching {
            self.remove_registration(*cat, ent, listener_id);
        }
        matching.len()
    }

    fn unregister_category(&mut self, category: EventCategory, entity_id: Option<&str>) -> usize {
        let Some(entities) = self.listeners.get_mut(&category) else {
            return 0;
        };

        let removed: Vec<(EntityId, Vec<Registration>)> = match entity_id {
            Some(entity_id) => entities
                .remove_entry(entity_id)
                .into_iter()
                .collect(),
            None => entities.drain().collect(),
        };
        if entities.is_empty() {
            self.listeners.remove(&category);
        }

        let mut count = 0;
        for (entity, registrations) in removed {
            for registration in registrations {
                self.drop_index_entry(&registration.listener_id, category, &entity);
                count += 1;
            }
        }
        count
    }

    fn remove_registration(&mut self, category: EventCategory, entity_id: &str, listener_id: &str) {
        let Some(entities) = self.listeners.get_mut(&category) else {
            return;
        };
        if let Some(registrations) = entities.get_mut(entity_id) {
            registrations.retain(|registration| registration.listener_id != listener_id);
            if registrations.is_empty() {
                entities.remove(entity_id);
            }
        }
        if entities.is_empty() {
            self.listeners.remove(&category);
        }
    }

    fn drop_index_entry(&mut self, listener_id: &str, category: EventCategory, entity_id: &str) {
        if let Some(keys) = self.index.get_mut(listener_id) {
            keys.remove(&(category, entity_id.to_string()));
            if keys.is_empty() {
                self.index.remove(listener_id);
            }
        }
    }

    /// Snapshot of the targets registered for one entity, in registration
    /// order, paired with their listener ids.
    pub fn listeners(&self, category: EventCategory, entity_id: &str) -> Vec<(ListenerId, EventTarget)> {
        self.listeners
            .get(&category)
            .and_then(|entities| entities.get(entity_id))
            .map(|registrations| {
                registrations
                    .iter()
                    .map(|registration| (registration.listener_id.clone(), registration.target.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every (category, entity id) a listener is registered under.
    pub fn registrations_of(&self, listener_id: &str) -> Vec<(EventCategory, EntityId)> {
        self.index
            .get(listener_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.listeners
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
