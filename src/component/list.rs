use std::collections::HashMap;
use std::sync::Arc;

use crate::component::DiskComponent;
use crate::error::{Error, Result};
use crate::types::ComponentId;

/// The immutable components of one index, newest first.
///
/// Components live in an arena keyed by [`ComponentId`]; `order` lists
/// their ids newest to oldest. The index guards this with a lock and hands
/// merge policies a [`ComponentSnapshot`] so scans run without it.
#[derive(Debug, Default)]
pub struct ImmutableComponentList {
    arena: HashMap<ComponentId, Arc<DiskComponent>>,
    order: Vec<ComponentId>,
}

impl ImmutableComponentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly flushed component as the newest.
    pub fn prepend(&mut self, component: Arc<DiskComponent>) {
        self.order.insert(0, component.id());
        self.arena.insert(component.id(), component);
    }

    /// Insert a component as the oldest (used while reloading from disk).
    pub fn append_oldest(&mut self, component: Arc<DiskComponent>) {
        self.order.push(component.id());
        self.arena.insert(component.id(), component);
    }

    /// Swap the members of a finished merge for its result.
    ///
    /// The result takes the position of the newest merged member, so the
    /// list stays ordered by recency.
    pub fn replace_merged(&mut self, merged: &[ComponentId], result: Arc<DiskComponent>) -> Result<()> {
        if let Some(missing) = merged.iter().find(|id| !self.arena.contains_key(id)) {
            return Err(Error::Corruption(format!(
                "merged component {missing} is not in the component list"
            )));
        }
        let position = self
            .order
            .iter()
            .position(|id| merged.contains(id))
            .unwrap_or(self.order.len());

        self.order.retain(|id| !merged.contains(id));
        for id in merged {
            self.arena.remove(id);
        }
        self.order.insert(position, result.id());
        self.arena.insert(result.id(), result);
        Ok(())
    }

    pub fn get(&self, id: ComponentId) -> Option<&Arc<DiskComponent>> {
        self.arena.get(&id)
    }

    pub fn ids(&self) -> &[ComponentId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Consistent copy of the list, newest first.
    pub fn snapshot(&self) -> ComponentSnapshot {
        ComponentSnapshot::new(self.order.iter().map(|id| Arc::clone(&self.arena[id])).collect())
    }
}

/// Point-in-time view of an index's immutable components, newest first.
#[derive(Debug, Clone, Default)]
pub struct ComponentSnapshot {
    components: Vec<Arc<DiskComponent>>,
}

impl ComponentSnapshot {
    pub fn new(newest_first: Vec<Arc<DiskComponent>>) -> Self {
        ComponentSnapshot {
            components: newest_first,
        }
    }

    pub fn newest_first(&self) -> &[Arc<DiskComponent>] {
        &self.components
    }

    pub fn oldest_first(&self) -> Vec<Arc<DiskComponent>> {
        self.components.iter().rev().cloned().collect()
    }

    pub fn into_vec(self) -> Vec<Arc<DiskComponent>> {
        self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn ids(&self) -> Vec<ComponentId> {
        self.components.iter().map(|c| c.id()).collect()
    }
}
