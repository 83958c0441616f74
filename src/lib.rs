//! rowbind: schema-directed object hydration for relational row sets
//!
//! Given a registered target type (its construction paths and member
//! setters) and a database row schema, the engine negotiates a mapping from
//! columns to the type tree, compiles a specialized row parser, and caches
//! it by `(target type, schema fingerprint)`. Parsers are then invoked per
//! row of a forward-only cursor.

pub mod cache;
pub mod codegen;
pub mod engine;
pub mod matcher;
pub mod plan;
pub mod registry;
pub mod schema;
pub mod typeinfo;
pub mod value;

// Re-export commonly used types
pub use codegen::{CompileError, ExecutionHint};
pub use engine::{global, EngineError, MappingEngine, TypedParser};
pub use matcher::{ColumnModifier, CustomMatcher, FoldedNameIndex, NameIndex, Negotiation};
pub use plan::{Plan, PlanSummary};
pub use registry::{RegistryError, RegistrySnapshot, TypeRegistry};
pub use schema::{Column, Schema, SchemaBuilder, SchemaFingerprint};
pub use typeinfo::{
    Describe, MatcherKind, MemberSpec, NullPolicy, ParamDesc, PathSpec, TypeDesc, TypeKey, TypeRef,
};
pub use value::{BasicType, FromValue, PathArgs, Row, RowError, Value, VecRow};
