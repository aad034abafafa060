//! Filter Predicate Engine
//!
//! A small query language over node options: literals, regular
//! expressions, function predicates and `$`-operators, compiled into
//! predicates used by the registry to select routing candidates.

pub mod predicate;
pub mod spec;
pub mod wire;

pub use predicate::{compile, matches_spec};
pub use spec::{FieldPredicate, Filter, FilterSpec, FilterValue, Operator, Predicate};
pub use wire::REGEXP_TYPE;
