use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use super::snapshot::{ResourceChanges, Snapshot};
use crate::error::{NotFoundError, UnitOfWorkError};
use crate::model::{Aggregate, AggregateRoot, AggregateType, EntityId};

/// Identity map of one unit of work.
///
/// Holds at most one live aggregate per `(type, id)`. Every lookup hands
/// out a reference into the map, so a mutation through one lookup is what
/// the next lookup sees.
///
/// Change detection works on snapshots: the first [`take_snapshot`] records
/// the baseline (at entry), the second the pre-save state. A third call is a
/// programming error.
///
/// [`take_snapshot`]: ResourceContainer::take_snapshot
#[derive(Debug, Default)]
pub struct ResourceContainer {
    partitions: BTreeMap<AggregateType, BTreeMap<EntityId, Aggregate>>,
    baseline: Option<Snapshot>,
    pre_save: Option<Snapshot>,
}

impl ResourceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces by id within `aggregate_type`'s partition.
    ///
    /// # Errors
    /// [`UnitOfWorkError::TypeMismatch`] if `aggregate` is of another kind.
    pub fn put(&mut self, aggregate_type: AggregateType, aggregate: Aggregate) -> Result<(), UnitOfWorkError> {
        let actual = aggregate.aggregate_type();
        if actual != aggregate_type {
            return Err(UnitOfWorkError::TypeMismatch {
                expected: aggregate_type,
                actual,
            });
        }
        self.partitions
            .entry(aggregate_type)
            .or_default()
            .insert(aggregate.entity_id(), aggregate);
        Ok(())
    }

    /// Puts every aggregate; later duplicates overwrite earlier ones.
    /// Stops at the first mismatched kind.
    pub fn put_many<I>(&mut self, aggregate_type: AggregateType, aggregates: I) -> Result<(), UnitOfWorkError>
    where
        I: IntoIterator<Item = Aggregate>,
    {
        for aggregate in aggregates {
            self.put(aggregate_type, aggregate)?;
        }
        Ok(())
    }

    /// Typed [`put`](Self::put). Cannot mismatch.
    pub fn insert<T: AggregateRoot>(&mut self, aggregate: T) {
        self.partitions
            .entry(T::TYPE)
            .or_default()
            .insert(aggregate.entity_id(), aggregate.into_aggregate());
    }

    pub fn get_by_id(&self, aggregate_type: AggregateType, entity_id: EntityId) -> Result<&Aggregate, NotFoundError> {
        self.get_by_id_or_none(aggregate_type, entity_id)
            .ok_or_else(|| NotFoundError::new(aggregate_type, vec![entity_id]))
    }

    pub fn get_by_id_mut(
        &mut self,
        aggregate_type: AggregateType,
        entity_id: EntityId,
    ) -> Result<&mut Aggregate, NotFoundError> {
        self.partitions
            .get_mut(&aggregate_type)
            .and_then(|p| p.get_mut(&entity_id))
            .ok_or_else(|| NotFoundError::new(aggregate_type, vec![entity_id]))
    }

    pub fn get_by_id_or_none(&self, aggregate_type: AggregateType, entity_id: EntityId) -> Option<&Aggregate> {
        self.partitions.get(&aggregate_type)?.get(&entity_id)
    }

    /// Aggregates for the given ids, in request order. Unknown ids are
    /// skipped; callers needing all of them compare lengths.
    pub fn get_by_ids(&self, aggregate_type: AggregateType, ids: &[EntityId]) -> Vec<&Aggregate> {
        ids.iter()
            .filter_map(|&id| self.get_by_id_or_none(aggregate_type, id))
            .collect()
    }

    /// Aggregates whose serialized `attribute` is one of `values`.
    pub fn get_by_attribute(
        &self,
        aggregate_type: AggregateType,
        attribute: &str,
        values: &[Value],
    ) -> Result<Vec<&Aggregate>, UnitOfWorkError> {
        let mut found = Vec::new();
        for aggregate in self.get_all(aggregate_type) {
            let snapshot = aggregate.to_snapshot()?;
            if snapshot.get(attribute).is_some_and(|v| values.contains(v)) {
                found.push(aggregate);
            }
        }
        Ok(found)
    }

    /// Every aggregate of a type, ordered by id.
    pub fn get_all(&self, aggregate_type: AggregateType) -> impl Iterator<Item = &Aggregate> + '_ {
        self.partitions
            .get(&aggregate_type)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    pub fn get<T: AggregateRoot>(&self, entity_id: EntityId) -> Result<&T, NotFoundError> {
        self.get_by_id(T::TYPE, entity_id).and_then(|a| {
            T::from_aggregate(a).ok_or_else(|| NotFoundError::new(T::TYPE, vec![entity_id]))
        })
    }

    pub fn get_mut<T: AggregateRoot>(&mut self, entity_id: EntityId) -> Result<&mut T, NotFoundError> {
        self.get_by_id_mut(T::TYPE, entity_id).and_then(|a| {
            T::from_aggregate_mut(a).ok_or_else(|| NotFoundError::new(T::TYPE, vec![entity_id]))
        })
    }

    /// Typed [`get_all`](Self::get_all).
    pub fn all<T: AggregateRoot>(&self) -> impl Iterator<Item = &T> + '_ {
        self.get_all(T::TYPE).filter_map(T::from_aggregate)
    }

    pub fn contains(&self, aggregate_type: AggregateType, entity_id: EntityId) -> bool {
        self.get_by_id_or_none(aggregate_type, entity_id).is_some()
    }

    pub fn len(&self, aggregate_type: AggregateType) -> usize {
        self.partitions.get(&aggregate_type).map_or(0, BTreeMap::len)
    }

    /// Removes an aggregate. If it was in the baseline, the next diff
    /// reports it as deleted.
    pub fn delete(&mut self, aggregate_type: AggregateType, entity_id: EntityId) -> Result<Aggregate, NotFoundError> {
        self.partitions
            .get_mut(&aggregate_type)
            .and_then(|p| p.remove(&entity_id))
            .ok_or_else(|| NotFoundError::new(aggregate_type, vec![entity_id]))
    }

    /// Deletes every id, or none of them if any is missing.
    pub fn delete_many(
        &mut self,
        aggregate_type: AggregateType,
        ids: &[EntityId],
    ) -> Result<Vec<Aggregate>, NotFoundError> {
        let missing: Vec<EntityId> = ids
            .iter()
            .copied()
            .filter(|&id| !self.contains(aggregate_type, id))
            .collect();
        if !missing.is_empty() {
            return Err(NotFoundError::new(aggregate_type, missing));
        }
        ids.iter()
            .map(|&id| self.delete(aggregate_type, id))
            .collect()
    }

    pub fn remove<T: AggregateRoot>(&mut self, entity_id: EntityId) -> Result<T, NotFoundError> {
        let aggregate = self.delete(T::TYPE, entity_id)?;
        T::from_aggregate(&aggregate)
            .cloned()
            .ok_or_else(|| NotFoundError::new(T::TYPE, vec![entity_id]))
    }

    fn capture(&self) -> Result<Snapshot, UnitOfWorkError> {
        let mut states = BTreeMap::new();
        for (&aggregate_type, partition) in &self.partitions {
            let mut serialized = BTreeMap::new();
            for (&entity_id, aggregate) in partition {
                serialized.insert(entity_id, aggregate.to_snapshot()?);
            }
            states.insert(aggregate_type, serialized);
        }
        Ok(Snapshot::from_states(states))
    }

    /// Records the baseline on the first call and the pre-save state on the
    /// second.
    ///
    /// # Errors
    /// [`UnitOfWorkError::SnapshotsExhausted`] on a third call.
    pub fn take_snapshot(&mut self) -> Result<(), UnitOfWorkError> {
        if self.pre_save.is_some() {
            return Err(UnitOfWorkError::SnapshotsExhausted);
        }
        let snapshot = self.capture()?;
        let size = snapshot.len();
        if self.baseline.is_none() {
            self.baseline = Some(snapshot);
            debug!(size, "baseline snapshot taken");
        } else {
            self.pre_save = Some(snapshot);
            debug!(size, "pre-save snapshot taken");
        }
        Ok(())
    }

    pub fn baseline(&self) -> Option<&Snapshot> {
        self.baseline.as_ref()
    }

    /// Differences between the baseline and the pre-save snapshot, or the
    /// live state if no pre-save snapshot was taken yet.
    ///
    /// # Errors
    /// [`UnitOfWorkError::SnapshotMissing`] before the baseline exists.
    pub fn get_resource_changes(&self) -> Result<ResourceChanges, UnitOfWorkError> {
        let baseline = self.baseline.as_ref().ok_or(UnitOfWorkError::SnapshotMissing)?;
        match &self.pre_save {
            Some(pre_save) => Ok(baseline.diff(pre_save)),
            None => Ok(baseline.diff(&self.capture()?)),
        }
    }
}
