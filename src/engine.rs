//! Mapping engine
//!
//! [`MappingEngine`] is the public surface: it owns the type registry and
//! the parser cache, negotiates plans on cache misses, and hands out typed
//! parsers. Engines are explicit context structs; a process-wide instance
//! is available through [`global`] as an opt-in convenience.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::debug;

use crate::cache::ParserCache;
use crate::codegen::{self, CompileError, CompiledParser, ExecutionHint};
use crate::matcher::{FoldedNameIndex, Negotiation};
use crate::plan::{Plan, PlanSummary};
use crate::registry::{RegistryError, TypeRegistry};
use crate::schema::Schema;
use crate::typeinfo::path::NullPolicy;
use crate::typeinfo::{
    Describe, MatcherKind, MemberSpec, PathSpec, TypeDesc, TypeKey, TypeRef,
};
use crate::value::{Row, RowError};

/// Failures surfaced by [`MappingEngine::parser_for`] and the registration
/// surface. A negotiation that simply finds no mapping is not an error; it
/// is the absent value of `parser_for`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Schema-directed hydration engine: registry + parser cache.
pub struct MappingEngine {
    registry: TypeRegistry,
    cache: ParserCache,
}

impl Default for MappingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingEngine {
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::new(),
            cache: ParserCache::new(),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Number of compiled parsers currently cached.
    pub fn cached_parsers(&self) -> usize {
        self.cache.len()
    }

    /// Register a self-describing type. Idempotent.
    pub fn register<T: Describe>(&self) -> Result<(), EngineError> {
        self.registry.get_or_register::<T>()?;
        Ok(())
    }

    /// Register a hand-built descriptor, replacing any previous
    /// registration of the same type.
    pub fn register_manual(&self, desc: TypeDesc) -> Result<(), EngineError> {
        self.registry.register_manual(desc)?;
        Ok(())
    }

    /// Register an open generic definition with a closer callback.
    pub fn register_open(
        &self,
        def: &'static str,
        arity: u8,
        close: impl Fn(&[TypeRef]) -> Option<TypeDesc> + Send + Sync + 'static,
    ) -> Result<(), EngineError> {
        self.registry.register_open(def, arity, close)?;
        Ok(())
    }

    /// Remove a type's registration and evict its cached parsers.
    pub fn unregister<T: Any>(&self) -> bool {
        let key = TypeKey::of::<T>();
        let removed = self.registry.unregister(&key);
        if removed {
            let evicted = self.cache.evict_type(&key);
            debug!(ty = key.name(), evicted, "unregistered type");
        }
        removed
    }

    // --- registration mutation surface ---

    pub fn add_path<T: Any>(&self, spec: PathSpec) -> Result<(), EngineError> {
        Ok(self.registry.add_path(&self.target_ref::<T>()?, spec)?)
    }

    pub fn set_paths<T: Any>(&self, specs: Vec<PathSpec>) -> Result<(), EngineError> {
        Ok(self.registry.set_paths(&self.target_ref::<T>()?, specs)?)
    }

    pub fn add_member<T: Any>(&self, spec: MemberSpec) -> Result<(), EngineError> {
        Ok(self.registry.add_member(&self.target_ref::<T>()?, spec)?)
    }

    pub fn set_members<T: Any>(&self, specs: Vec<MemberSpec>) -> Result<(), EngineError> {
        Ok(self.registry.set_members(&self.target_ref::<T>()?, specs)?)
    }

    pub fn add_alias<T: Any>(&self, name: &str, alias: &str) -> Result<(), EngineError> {
        Ok(self.registry.add_alias(&self.target_ref::<T>()?, name, alias)?)
    }

    pub fn set_null_policy<T: Any>(
        &self,
        name: &str,
        policy: NullPolicy,
    ) -> Result<(), EngineError> {
        Ok(self
            .registry
            .set_null_policy(&self.target_ref::<T>()?, name, policy)?)
    }

    pub fn install_matcher<T: Any>(&self, matcher: MatcherKind) -> Result<(), EngineError> {
        Ok(self.registry.install_matcher(&self.target_ref::<T>()?, matcher)?)
    }

    fn target_ref<T: Any>(&self) -> Result<TypeRef, RegistryError> {
        let key = TypeKey::of::<T>();
        self.registry
            .snapshot()
            .ref_for_key(&key)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownType(key.name().to_string()))
    }

    /// Negotiate and compile a parser for `T` against the given schema, or
    /// return the cached one. `Ok(None)` means negotiation found no mapping;
    /// the caller decides whether to fall back or report.
    pub fn parser_for<T: Any + Send + Sync>(
        &self,
        schema: &Schema,
    ) -> Result<Option<TypedParser<T>>, EngineError> {
        let key = TypeKey::of::<T>();
        let fingerprint = schema.fingerprint();
        if let Some(parser) = self.cache.get(key, fingerprint) {
            return Ok(Some(TypedParser::new(parser)));
        }

        let target = self.target_ref::<T>()?;
        let snapshot = self.registry.prepare(&target)?;
        let index = FoldedNameIndex::build(schema);
        let mut negotiation = Negotiation::new(&snapshot, schema, &index);
        let Some(plan) = negotiation.negotiate_root(&target) else {
            return Ok(None);
        };

        let compiled = codegen::compile(plan)?;
        let stored = self.cache.insert(key, fingerprint, Arc::new(compiled));
        Ok(Some(TypedParser::new(stored)))
    }
}

/// A compiled parser bound to its target type.
pub struct TypedParser<T> {
    inner: Arc<CompiledParser>,
    _target: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedParser<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _target: PhantomData,
        }
    }
}

impl<T: Any + Send + Sync> TypedParser<T> {
    fn new(inner: Arc<CompiledParser>) -> Self {
        Self {
            inner,
            _target: PhantomData,
        }
    }

    /// Parse the cursor's current row into an instance of `T`.
    pub fn parse(&self, row: &dyn Row) -> Result<T, RowError> {
        self.inner.parse_value(row)?.into_custom::<T>()
    }

    pub fn hint(&self) -> ExecutionHint {
        self.inner.hint
    }

    pub fn plan(&self) -> &Plan {
        &self.inner.plan
    }

    pub fn summary(&self) -> PlanSummary {
        self.inner.plan.summary()
    }
}

/// The opt-in process-wide engine.
pub fn global() -> &'static MappingEngine {
    static GLOBAL: Lazy<MappingEngine> = Lazy::new(MappingEngine::new);
    &GLOBAL
}
