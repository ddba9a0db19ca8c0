//! # In-Memory Store
//!
//! A [`SessionProvider`] backed by process memory, for tests and the demo.
//!
//! - Committed rows live in one shared table set per [`InMemoryDatabase`].
//! - Each session stages its writes privately; they become visible to other
//!   sessions on commit and are dropped on rollback. A session reads its
//!   own staged writes.
//! - Criteria, ordering, offset and limit are evaluated on serialized rows.
//! - Locks are not modelled. [`InMemoryDatabase::fail_next_load`] injects
//!   the error a real backend would report under contention, and
//!   [`InMemoryDatabase::fail_next_save`] a failed write.
//! - Every begin/load/save/commit/rollback is appended to an event log.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Repository, RepositoryContainer, SessionProvider, TransactionControl};
use crate::container::Difference;
use crate::error::{ConcurrencyError, StoreError, UnitOfWorkError};
use crate::model::{Aggregate, AggregateRoot, AggregateType, EntityId};
use crate::query::{LockMode, ResolvedQuery};

type Table = BTreeMap<EntityId, Value>;

// =============================================================================
// EVENT LOG
// =============================================================================

/// One step a session took against the database.
#[derive(Debug, Clone, PartialEq)]
pub enum TxnEvent {
    Begun {
        session: u64,
    },
    Loaded {
        session: u64,
        aggregate_type: AggregateType,
        lock_mode: LockMode,
        count: usize,
    },
    Saved {
        session: u64,
        aggregate_type: AggregateType,
        created: usize,
        updated: usize,
        deleted: usize,
    },
    Committed {
        session: u64,
    },
    RolledBack {
        session: u64,
    },
}

#[derive(Debug, Default)]
struct DatabaseState {
    tables: BTreeMap<AggregateType, Table>,
    events: Vec<TxnEvent>,
    pending_failures: BTreeMap<AggregateType, ConcurrencyError>,
    pending_save_failures: BTreeMap<AggregateType, StoreError>,
}

// =============================================================================
// DATABASE
// =============================================================================

/// Shared committed state. Cloning yields another handle on the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
    next_session: Arc<AtomicU64>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits `aggregates` directly, outside any session.
    pub async fn seed<T: AggregateRoot>(&self, aggregates: impl IntoIterator<Item = T>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let table = state.tables.entry(T::TYPE).or_default();
        for aggregate in aggregates {
            let row = aggregate.to_snapshot().map_err(backend)?;
            table.insert(aggregate.entity_id(), row);
        }
        Ok(())
    }

    /// Reads a committed aggregate.
    pub async fn fetch<T: AggregateRoot>(&self, entity_id: EntityId) -> Result<Option<T>, StoreError> {
        let state = self.state.lock().await;
        state
            .tables
            .get(&T::TYPE)
            .and_then(|t| t.get(&entity_id))
            .map(|row| T::from_snapshot(row.clone()).map_err(backend))
            .transpose()
    }

    pub async fn count(&self, aggregate_type: AggregateType) -> usize {
        let state = self.state.lock().await;
        state.tables.get(&aggregate_type).map_or(0, BTreeMap::len)
    }

    pub async fn events(&self) -> Vec<TxnEvent> {
        self.state.lock().await.events.clone()
    }

    /// Makes the next load of `aggregate_type`, from any session, fail with
    /// `error`.
    pub async fn fail_next_load(&self, aggregate_type: AggregateType, error: ConcurrencyError) {
        self.state
            .lock()
            .await
            .pending_failures
            .insert(aggregate_type, error);
    }

    /// Makes the next write of `aggregate_type`, from any session, fail with
    /// `error`. Nothing of that write is staged.
    pub async fn fail_next_save(&self, aggregate_type: AggregateType, error: StoreError) {
        self.state
            .lock()
            .await
            .pending_save_failures
            .insert(aggregate_type, error);
    }

    /// A new session with its own staging area.
    pub fn session(&self) -> InMemorySession {
        InMemorySession {
            id: self.next_session.fetch_add(1, AtomicOrdering::Relaxed) + 1,
            state: Arc::clone(&self.state),
            staged: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// A repository container over a new session.
    pub fn repository_container(&self) -> Result<RepositoryContainer, UnitOfWorkError> {
        let session = self.session();
        AggregateType::ALL
            .iter()
            .fold(
                RepositoryContainer::builder(Arc::new(session.clone())),
                |builder, &aggregate_type| {
                    builder.repository(Arc::new(InMemoryRepository {
                        aggregate_type,
                        session: session.clone(),
                    }))
                },
            )
            .build()
    }
}

#[async_trait]
impl SessionProvider for InMemoryDatabase {
    async fn open_session(&self, wait_timeout: Duration) -> Result<RepositoryContainer, StoreError> {
        let container = self
            .repository_container()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        debug!(wait_timeout_ms = wait_timeout.as_millis() as u64, "session opened");
        Ok(container)
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Staged writes of one session. `None` marks a deletion.
type Staged = BTreeMap<AggregateType, BTreeMap<EntityId, Option<Value>>>;

#[derive(Debug, Clone)]
pub struct InMemorySession {
    id: u64,
    state: Arc<Mutex<DatabaseState>>,
    staged: Arc<Mutex<Staged>>,
}

impl InMemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl TransactionControl for InMemorySession {
    async fn begin(&self) -> Result<(), StoreError> {
        self.staged.lock().await.clear();
        self.state.lock().await.events.push(TxnEvent::Begun { session: self.id });
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut *self.staged.lock().await);
        let mut state = self.state.lock().await;
        for (aggregate_type, rows) in staged {
            let table = state.tables.entry(aggregate_type).or_default();
            for (entity_id, row) in rows {
                match row {
                    Some(row) => {
                        table.insert(entity_id, row);
                    }
                    None => {
                        table.remove(&entity_id);
                    }
                }
            }
        }
        state.events.push(TxnEvent::Committed { session: self.id });
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        let discarded: usize = std::mem::take(&mut *self.staged.lock().await)
            .into_values()
            .map(|rows| rows.len())
            .sum();
        if discarded > 0 {
            warn!(session = self.id, discarded, "staged writes discarded");
        }
        self.state
            .lock()
            .await
            .events
            .push(TxnEvent::RolledBack { session: self.id });
        Ok(())
    }
}

// =============================================================================
// REPOSITORY
// =============================================================================

#[derive(Debug)]
pub struct InMemoryRepository {
    aggregate_type: AggregateType,
    session: InMemorySession,
}

#[async_trait]
impl Repository for InMemoryRepository {
    fn aggregate_type(&self) -> AggregateType {
        self.aggregate_type
    }

    async fn get_by_attribute(&self, query: &ResolvedQuery) -> Result<Vec<Aggregate>, StoreError> {
        // Lock order: database state before staged writes, as in commit.
        let mut state = self.session.state.lock().await;
        if let Some(error) = state.pending_failures.remove(&self.aggregate_type) {
            return Err(StoreError::Concurrency(error));
        }

        let mut rows: Table = state.tables.get(&self.aggregate_type).cloned().unwrap_or_default();
        if let Some(own) = self.session.staged.lock().await.get(&self.aggregate_type) {
            for (entity_id, row) in own {
                match row {
                    Some(row) => rows.insert(*entity_id, row.clone()),
                    None => rows.remove(entity_id),
                };
            }
        }

        let mut matched: Vec<Value> = rows.into_values().filter(|row| query.matches(row)).collect();
        if let Some(order) = &query.order_by {
            matched.sort_by(|a, b| {
                let ordering = compare_values(
                    a.get(&order.attribute).unwrap_or(&Value::Null),
                    b.get(&order.attribute).unwrap_or(&Value::Null),
                );
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let window = matched
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX));
        let loaded = window
            .map(|row| Aggregate::from_snapshot(self.aggregate_type, row).map_err(backend))
            .collect::<Result<Vec<_>, _>>()?;

        state.events.push(TxnEvent::Loaded {
            session: self.session.id,
            aggregate_type: self.aggregate_type,
            lock_mode: query.lock_mode,
            count: loaded.len(),
        });
        Ok(loaded)
    }

    async fn save_difference(&self, difference: &Difference) -> Result<(), StoreError> {
        if let Some(error) = self
            .session
            .state
            .lock()
            .await
            .pending_save_failures
            .remove(&self.aggregate_type)
        {
            return Err(error);
        }
        {
            let mut staged = self.session.staged.lock().await;
            let rows = staged.entry(self.aggregate_type).or_default();
            for entry in &difference.created {
                rows.insert(entry.entity_id, Some(entry.state.clone()));
            }
            for entry in &difference.updated {
                rows.insert(entry.entity_id, Some(entry.after.clone()));
            }
            for entry in &difference.deleted {
                rows.insert(entry.entity_id, None);
            }
        }
        self.session.state.lock().await.events.push(TxnEvent::Saved {
            session: self.session.id,
            aggregate_type: self.aggregate_type,
            created: difference.created.len(),
            updated: difference.updated.len(),
            deleted: difference.deleted.len(),
        });
        Ok(())
    }
}

fn backend(e: serde_json::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Orders null < bool < number < string < everything else.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) | Value::Object(_) => 4,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Product;
    use crate::query::{Combinator, CriterionOperator, OrderBy, ResolvedTerm};
    use serde_json::json;

    fn sku_query(skus: &[&str]) -> ResolvedQuery {
        ResolvedQuery {
            model_type: AggregateType::Product,
            terms: vec![ResolvedTerm {
                attribute: "sku".into(),
                operator: CriterionOperator::In,
                values: skus.iter().map(|s| json!(s)).collect(),
                chained: false,
            }],
            combinator: None,
            lock_mode: LockMode::NoLock,
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    fn products() -> Vec<Product> {
        vec![
            Product::new(EntityId::new(), "A", "A", 5, 300),
            Product::new(EntityId::new(), "B", "B", 1, 100),
            Product::new(EntityId::new(), "C", "C", 9, 200),
        ]
    }

    #[tokio::test]
    async fn staged_writes_publish_on_commit_only() {
        let db = InMemoryDatabase::new();
        let product = Product::new(EntityId::new(), "A", "A", 5, 300);
        let id = product.entity_id;

        let session = db.session();
        let repository = InMemoryRepository {
            aggregate_type: AggregateType::Product,
            session: session.clone(),
        };
        session.begin().await.unwrap();
        let mut difference = Difference::default();
        difference.created.push(crate::container::SnapshotEntry {
            entity_id: id,
            state: product.to_snapshot().unwrap(),
        });
        repository.save_difference(&difference).await.unwrap();

        assert!(db.fetch::<Product>(id).await.unwrap().is_none());
        assert_eq!(repository.get_by_attribute(&sku_query(&["A"])).await.unwrap().len(), 1);

        session.commit().await.unwrap();
        assert_eq!(db.fetch::<Product>(id).await.unwrap().unwrap(), product);
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let db = InMemoryDatabase::new();
        let product = Product::new(EntityId::new(), "A", "A", 5, 300);
        db.seed([product.clone()]).await.unwrap();

        let session = db.session();
        let repository = InMemoryRepository {
            aggregate_type: AggregateType::Product,
            session: session.clone(),
        };
        session.begin().await.unwrap();
        let mut difference = Difference::default();
        difference.deleted.push(crate::container::SnapshotEntry {
            entity_id: product.entity_id,
            state: product.to_snapshot().unwrap(),
        });
        repository.save_difference(&difference).await.unwrap();
        session.rollback().await.unwrap();

        assert_eq!(db.count(AggregateType::Product).await, 1);
        let events = db.events().await;
        assert!(matches!(events.last(), Some(TxnEvent::RolledBack { .. })));
    }

    #[tokio::test]
    async fn order_offset_and_limit_apply_after_filtering() {
        let db = InMemoryDatabase::new();
        db.seed(products()).await.unwrap();
        let repository = InMemoryRepository {
            aggregate_type: AggregateType::Product,
            session: db.session(),
        };

        let mut query = sku_query(&["A", "B", "C"]);
        query.order_by = Some(OrderBy {
            attribute: "price".into(),
            descending: true,
        });
        query.offset = Some(1);
        query.limit = Some(1);

        let loaded = repository.get_by_attribute(&query).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].as_product().unwrap().sku, "C");
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let db = InMemoryDatabase::new();
        db.seed(products()).await.unwrap();
        db.fail_next_load(AggregateType::Product, ConcurrencyError::NoWaitViolated)
            .await;
        let repository = InMemoryRepository {
            aggregate_type: AggregateType::Product,
            session: db.session(),
        };

        let mut query = sku_query(&["A"]);
        query.terms.push(ResolvedTerm {
            attribute: "sku".into(),
            operator: CriterionOperator::Equals,
            values: vec![json!("B")],
            chained: false,
        });
        query.combinator = Some(Combinator::Or);

        assert_eq!(
            repository.get_by_attribute(&query).await.unwrap_err(),
            StoreError::Concurrency(ConcurrencyError::NoWaitViolated)
        );
        assert_eq!(repository.get_by_attribute(&query).await.unwrap().len(), 2);
    }

    #[test]
    fn values_compare_by_kind_then_content() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!(1.5), &json!(1)), Ordering::Greater);
    }
}
