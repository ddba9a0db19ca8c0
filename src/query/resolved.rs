//! A plan entry with every chained source replaced by concrete values.
//!
//! This is what the persistence adapter receives: no references to other
//! entries, no extractors, just attribute/value terms plus lock, order and
//! window.

use serde_json::Value;

use super::criteria::{Combinator, CriterionOperator};
use super::plan::{LockMode, OrderBy};
use crate::model::{AggregateType, EntityId};

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTerm {
    pub attribute: String,
    pub operator: CriterionOperator,
    pub values: Vec<Value>,
    /// Values came from an earlier entry's result.
    pub chained: bool,
}

impl ResolvedTerm {
    /// True if `snapshot`'s attribute satisfies this term.
    pub fn matches(&self, snapshot: &Value) -> bool {
        let Some(actual) = snapshot.get(&self.attribute) else {
            return false;
        };
        match self.operator {
            CriterionOperator::In => self.values.contains(actual),
            CriterionOperator::Equals => self.values.first() == Some(actual),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub model_type: AggregateType,
    pub terms: Vec<ResolvedTerm>,
    pub combinator: Option<Combinator>,
    pub lock_mode: LockMode,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ResolvedQuery {
    /// Evaluates the criteria against a serialized aggregate.
    pub fn matches(&self, snapshot: &Value) -> bool {
        match self.combinator {
            Some(Combinator::Or) => self.terms.iter().any(|t| t.matches(snapshot)),
            Some(Combinator::And) | None => self.terms.iter().all(|t| t.matches(snapshot)),
        }
    }

    /// A lookup by `entity_id` alone, literal or chained.
    pub fn is_exact_id_lookup(&self) -> bool {
        matches!(self.terms.as_slice(), [term] if term.attribute == "entity_id")
    }

    /// Every term has literal values.
    pub fn is_literal(&self) -> bool {
        self.terms.iter().all(|t| !t.chained)
    }

    /// Distinct ids requested by an exact id lookup, in request order.
    pub fn requested_ids(&self) -> Vec<EntityId> {
        if !self.is_exact_id_lookup() {
            return Vec::new();
        }
        let mut ids: Vec<EntityId> = Vec::new();
        for id in self.terms[0].values.iter().filter_map(EntityId::from_value) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// True if no term can match anything.
    pub fn is_unsatisfiable(&self) -> bool {
        match self.combinator {
            Some(Combinator::Or) => self.terms.iter().all(|t| t.values.is_empty()),
            Some(Combinator::And) | None => self.terms.iter().any(|t| t.values.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn term(attribute: &str, values: Vec<Value>) -> ResolvedTerm {
        ResolvedTerm {
            attribute: attribute.into(),
            operator: CriterionOperator::In,
            values,
            chained: false,
        }
    }

    fn query(terms: Vec<ResolvedTerm>, combinator: Option<Combinator>) -> ResolvedQuery {
        ResolvedQuery {
            model_type: AggregateType::Product,
            terms,
            combinator,
            lock_mode: LockMode::NoLock,
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    #[test]
    fn and_or_evaluation() {
        let row = json!({ "sku": "A", "name": "Widget" });
        let sku = term("sku", vec![json!("A")]);
        let name = term("name", vec![json!("Gadget")]);

        assert!(!query(vec![sku.clone(), name.clone()], Some(Combinator::And)).matches(&row));
        assert!(query(vec![sku, name], Some(Combinator::Or)).matches(&row));
    }

    #[test]
    fn missing_attribute_never_matches() {
        let q = query(vec![term("colour", vec![json!("red")])], None);
        assert!(!q.matches(&json!({ "sku": "A" })));
    }

    #[test]
    fn requested_ids_are_distinct() {
        let id = EntityId::new();
        let q = query(vec![term("entity_id", vec![id.to_value(), id.to_value()])], None);
        assert!(q.is_exact_id_lookup());
        assert_eq!(q.requested_ids(), vec![id]);

        let q = query(vec![term("sku", vec![json!("A")])], None);
        assert!(!q.is_exact_id_lookup());
        assert!(q.requested_ids().is_empty());
    }
}
