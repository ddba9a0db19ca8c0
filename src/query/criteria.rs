//! Criteria terms and the token chain they are parsed from.
//!
//! The builder records terms and combinators as a flat token list; the list
//! is only checked when the plan is built, so a malformed chain surfaces as
//! a [`ValidationError`](crate::error::ValidationError) from `build()` and
//! never at evaluation time.

use serde_json::Value;
use std::fmt;

use crate::error::ValidationErrorKind;
use crate::model::Aggregate;

/// Pure function mapping a loaded source aggregate to criteria values.
pub type ExtractFn = fn(&Aggregate) -> Vec<Value>;

/// Extraction strategy of a chained query.
///
/// A plain function pointer: it carries no state, so plans stay `Clone`
/// and comparable.
#[derive(Clone, Copy)]
pub struct ValueExtractor(ExtractFn);

impl ValueExtractor {
    pub fn new(extract: ExtractFn) -> Self {
        Self(extract)
    }

    pub fn extract(&self, source: &Aggregate) -> Vec<Value> {
        (self.0)(source)
    }

    fn address(&self) -> usize {
        self.0 as usize
    }
}

impl PartialEq for ValueExtractor {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl fmt::Debug for ValueExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueExtractor({:#x})", self.address())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriterionOperator {
    /// Attribute value is one of the given values.
    In,
    /// Attribute value equals the single given value.
    Equals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

/// Where a term's values come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// Literal values fixed at build time.
    Values(Vec<Value>),
    /// Values extracted from the aggregates loaded by an earlier entry.
    Previous { index: usize, extractor: ValueExtractor },
}

/// One `(attribute, operator, values)` term.
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub attribute: String,
    pub operator: CriterionOperator,
    pub source: ValueSource,
}

impl Criterion {
    pub fn values(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: CriterionOperator::In,
            source: ValueSource::Values(values),
        }
    }

    pub fn equals(attribute: impl Into<String>, value: Value) -> Self {
        Self {
            attribute: attribute.into(),
            operator: CriterionOperator::Equals,
            source: ValueSource::Values(vec![value]),
        }
    }

    pub fn previous(attribute: impl Into<String>, index: usize, extractor: ValueExtractor) -> Self {
        Self {
            attribute: attribute.into(),
            operator: CriterionOperator::In,
            source: ValueSource::Previous { index, extractor },
        }
    }

    pub fn previous_index(&self) -> Option<usize> {
        match self.source {
            ValueSource::Previous { index, .. } => Some(index),
            ValueSource::Values(_) => None,
        }
    }
}

/// Raw builder input, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum CriteriaToken {
    Term(Criterion),
    Combinator(Combinator),
}

/// A validated criteria chain: one or more terms joined by a single
/// combinator kind.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCriteria {
    terms: Vec<Criterion>,
    combinator: Option<Combinator>,
}

impl QueryCriteria {
    /// Validates a token chain.
    ///
    /// # Errors
    /// Rejects an empty chain, a leading or trailing combinator, two
    /// combinators or two terms in a row, and a chain mixing AND with OR.
    pub fn parse(tokens: Vec<CriteriaToken>) -> Result<Self, ValidationErrorKind> {
        let mut terms = Vec::new();
        let mut combinator: Option<Combinator> = None;
        let mut expect_term = true;

        for token in tokens {
            match token {
                CriteriaToken::Term(criterion) => {
                    if !expect_term {
                        return Err(ValidationErrorKind::MissingCombinator);
                    }
                    terms.push(criterion);
                    expect_term = false;
                }
                CriteriaToken::Combinator(op) => {
                    if expect_term {
                        return Err(if terms.is_empty() {
                            ValidationErrorKind::LeadingCombinator
                        } else {
                            ValidationErrorKind::DoubleCombinator
                        });
                    }
                    match combinator {
                        Some(existing) if existing != op => {
                            return Err(ValidationErrorKind::MixedCombinators)
                        }
                        _ => combinator = Some(op),
                    }
                    expect_term = true;
                }
            }
        }

        if terms.is_empty() {
            return Err(ValidationErrorKind::EmptyCriteria);
        }
        if expect_term {
            return Err(ValidationErrorKind::Unterminated);
        }
        Ok(Self { terms, combinator })
    }

    pub fn terms(&self) -> &[Criterion] {
        &self.terms
    }

    /// `None` for a single-term chain.
    pub fn combinator(&self) -> Option<Combinator> {
        self.combinator
    }

    /// Indices of earlier entries this chain reads from.
    pub fn sources(&self) -> impl Iterator<Item = usize> + '_ {
        self.terms.iter().filter_map(Criterion::previous_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(attribute: &str) -> CriteriaToken {
        CriteriaToken::Term(Criterion::values(attribute, vec![Value::from("x")]))
    }

    #[test]
    fn single_term_has_no_combinator() {
        let criteria = QueryCriteria::parse(vec![term("sku")]).unwrap();
        assert_eq!(criteria.terms().len(), 1);
        assert_eq!(criteria.combinator(), None);
    }

    #[test]
    fn malformed_chains_are_rejected() {
        use CriteriaToken::Combinator as C;

        let cases = vec![
            (vec![], ValidationErrorKind::EmptyCriteria),
            (vec![C(Combinator::And), term("a")], ValidationErrorKind::LeadingCombinator),
            (vec![term("a"), C(Combinator::And)], ValidationErrorKind::Unterminated),
            (
                vec![term("a"), C(Combinator::Or), C(Combinator::Or), term("b")],
                ValidationErrorKind::DoubleCombinator,
            ),
            (vec![term("a"), term("b")], ValidationErrorKind::MissingCombinator),
            (
                vec![term("a"), C(Combinator::And), term("b"), C(Combinator::Or), term("c")],
                ValidationErrorKind::MixedCombinators,
            ),
        ];

        for (tokens, expected) in cases {
            assert_eq!(QueryCriteria::parse(tokens).unwrap_err(), expected);
        }
    }

    #[test]
    fn or_chain_keeps_term_order() {
        let criteria = QueryCriteria::parse(vec![
            term("name"),
            CriteriaToken::Combinator(Combinator::Or),
            term("sku"),
        ])
        .unwrap();
        let attributes: Vec<_> = criteria.terms().iter().map(|t| t.attribute.as_str()).collect();
        assert_eq!(attributes, vec!["name", "sku"]);
        assert_eq!(criteria.combinator(), Some(Combinator::Or));
    }
}
