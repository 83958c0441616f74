//! Column-name lookup
//!
//! The engine finds candidate columns through a case-insensitive name index
//! built once per negotiation. [`NameIndex`] is the external contract; a
//! driver layer may substitute its own accelerated mapper, while
//! [`FoldedNameIndex`] is the in-crate implementation.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::schema::{Schema, fold_name};

/// Case-insensitive name → index structure.
pub trait NameIndex: Send + Sync {
    /// Index of the first column with the given name, if any.
    fn index_of(&self, name: &str) -> Option<u32>;
}

/// Hash index over case-folded column names. Duplicate names keep every
/// position, in schema order, so lookups can prefer the earliest unused one.
#[derive(Debug, Default)]
pub struct FoldedNameIndex {
    map: FxHashMap<String, SmallVec<[u32; 1]>>,
}

impl FoldedNameIndex {
    pub fn build(schema: &Schema) -> Self {
        let mut map: FxHashMap<String, SmallVec<[u32; 1]>> = FxHashMap::default();
        for column in schema.columns() {
            map.entry(fold_name(&column.name))
                .or_default()
                .push(u32::from(column.position));
        }
        Self { map }
    }

    /// All positions carrying the given case-folded name, in schema order.
    pub fn positions(&self, folded_name: &str) -> &[u32] {
        self.map
            .get(folded_name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

impl NameIndex for FoldedNameIndex {
    fn index_of(&self, name: &str) -> Option<u32> {
        self.positions(&fold_name(name)).first().copied()
    }
}
