//! # Aggregate Kinds
//!
//! The closed set of aggregate kinds this crate knows about, and the
//! [`AggregateRoot`] trait that lets generic code (container, manager,
//! repositories) work over all of them.
//!
//! Everything here is generated by the `aggregates!` macro from one list of
//! kind names, so [`AggregateType`], the [`Aggregate`] sum type and the
//! per-kind trait impls can never drift apart. Adding a kind means adding it
//! to that list; every `match` over [`AggregateType`] then fails to compile
//! until the new kind is handled (lock order, repositories, references).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Debug, Display};

use super::ids::EntityId;
use super::{Customer, Product, PurchaseActive};

/// Contract every aggregate kind satisfies.
///
/// The snapshot methods define the serialization contract the change
/// tracker relies on: `to_snapshot` must be a pure function of the
/// aggregate's persistent state, and snapshot equality is structural.
pub trait AggregateRoot: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Tag of this kind.
    const TYPE: AggregateType;

    fn entity_id(&self) -> EntityId;

    fn into_aggregate(self) -> Aggregate;

    /// Borrows the typed aggregate out of the sum type, if the kind matches.
    fn from_aggregate(aggregate: &Aggregate) -> Option<&Self>;

    fn from_aggregate_mut(aggregate: &mut Aggregate) -> Option<&mut Self>;

    /// Serialized field state.
    fn to_snapshot(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Rebuilds the aggregate from a snapshot produced by `to_snapshot`.
    fn from_snapshot(snapshot: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(snapshot)
    }
}

macro_rules! aggregates {
    ($($kind:ident),+ $(,)?) => {
        paste::paste! {
            /// Tag identifying an aggregate kind.
            ///
            /// Used as the key of every per-type collection in this crate.
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            pub enum AggregateType {
                $($kind),+
            }

            impl AggregateType {
                /// Every kind, in declaration order.
                pub const ALL: &'static [AggregateType] = &[$(AggregateType::$kind),+];

                pub fn name(&self) -> &'static str {
                    match self {
                        $(AggregateType::$kind => stringify!($kind)),+
                    }
                }
            }

            /// A live aggregate of any known kind.
            #[derive(Debug, Clone, PartialEq)]
            pub enum Aggregate {
                $($kind($kind)),+
            }

            impl Aggregate {
                pub fn aggregate_type(&self) -> AggregateType {
                    match self {
                        $(Aggregate::$kind(_) => AggregateType::$kind),+
                    }
                }

                pub fn entity_id(&self) -> EntityId {
                    match self {
                        $(Aggregate::$kind(inner) => inner.entity_id()),+
                    }
                }

                pub fn to_snapshot(&self) -> Result<Value, serde_json::Error> {
                    match self {
                        $(Aggregate::$kind(inner) => inner.to_snapshot()),+
                    }
                }

                pub fn from_snapshot(
                    aggregate_type: AggregateType,
                    snapshot: Value,
                ) -> Result<Self, serde_json::Error> {
                    match aggregate_type {
                        $(AggregateType::$kind => $kind::from_snapshot(snapshot).map(Aggregate::$kind)),+
                    }
                }

                $(
                    pub fn [<as_ $kind:snake>](&self) -> Option<&$kind> {
                        $kind::from_aggregate(self)
                    }

                    pub fn [<as_ $kind:snake _mut>](&mut self) -> Option<&mut $kind> {
                        $kind::from_aggregate_mut(self)
                    }
                )+
            }

            $(
                impl AggregateRoot for $kind {
                    const TYPE: AggregateType = AggregateType::$kind;

                    fn entity_id(&self) -> EntityId {
                        self.entity_id
                    }

                    fn into_aggregate(self) -> Aggregate {
                        Aggregate::$kind(self)
                    }

                    fn from_aggregate(aggregate: &Aggregate) -> Option<&Self> {
                        match aggregate {
                            Aggregate::$kind(inner) => Some(inner),
                            #[allow(unreachable_patterns)]
                            _ => None,
                        }
                    }

                    fn from_aggregate_mut(aggregate: &mut Aggregate) -> Option<&mut Self> {
                        match aggregate {
                            Aggregate::$kind(inner) => Some(inner),
                            #[allow(unreachable_patterns)]
                            _ => None,
                        }
                    }
                }

                impl From<$kind> for Aggregate {
                    fn from(inner: $kind) -> Self {
                        Aggregate::$kind(inner)
                    }
                }
            )+
        }
    };
}

aggregates!(Customer, PurchaseActive, Product);

impl Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
