//! Parser cache
//!
//! Compiled parsers are cached by `(target type, schema fingerprint)` for
//! the lifetime of the process. Concurrent negotiations for the same key
//! race benignly: the first insert wins and later compilations are
//! discarded. Entries are only evicted when their target type is
//! unregistered.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::codegen::CompiledParser;
use crate::schema::SchemaFingerprint;
use crate::typeinfo::TypeKey;

#[derive(Default)]
pub struct ParserCache {
    map: DashMap<(TypeKey, SchemaFingerprint), Arc<CompiledParser>>,
}

impl ParserCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        key: TypeKey,
        fingerprint: SchemaFingerprint,
    ) -> Option<Arc<CompiledParser>> {
        let entry = self.map.get(&(key, fingerprint)).map(|e| e.value().clone());
        debug!(ty = key.name(), ?fingerprint, hit = entry.is_some(), "parser cache lookup");
        entry
    }

    /// Insert idempotently: the stored parser is returned, which is the
    /// caller's own unless another thread won the race.
    pub fn insert(
        &self,
        key: TypeKey,
        fingerprint: SchemaFingerprint,
        parser: Arc<CompiledParser>,
    ) -> Arc<CompiledParser> {
        self.map
            .entry((key, fingerprint))
            .or_insert(parser)
            .value()
            .clone()
    }

    pub fn contains(&self, key: TypeKey, fingerprint: SchemaFingerprint) -> bool {
        self.map.contains_key(&(key, fingerprint))
    }

    /// Drop every entry compiled for the given target type. Returns the
    /// number of evicted parsers.
    pub fn evict_type(&self, key: &TypeKey) -> usize {
        let before = self.map.len();
        self.map.retain(|(entry_key, _), _| entry_key != key);
        before - self.map.len()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
