//! Column name modifier
//!
//! During descent into nested types, each complex slot pushes its name
//! candidates as a prefix layer. The effective column names for a terminal
//! slot are the cross-product concatenation of every layer plus the slot's
//! own candidates, so identically named columns of different sub-structures
//! stay distinguishable (`SupervisorId` vs `SupervisorBossId`).

use smallvec::SmallVec;

/// Stack of case-folded name-candidate layers, outermost first.
#[derive(Debug, Clone, Default)]
pub struct ColumnModifier {
    layers: Vec<SmallVec<[String; 2]>>,
}

impl ColumnModifier {
    pub fn push_layer(&mut self, candidates: &[String]) {
        self.layers.push(candidates.iter().cloned().collect());
    }

    pub fn pop_layer(&mut self) {
        self.layers.pop();
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// All effective column names for the given leaf candidates, in
    /// deterministic order: outermost layer candidates vary slowest, the
    /// leaf candidates fastest.
    pub fn expand(&self, leaf: &[String]) -> Vec<String> {
        let mut names = vec![String::new()];
        for layer in &self.layers {
            names = cross(&names, layer);
        }
        cross(&names, leaf)
    }
}

fn cross(prefixes: &[String], candidates: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(prefixes.len() * candidates.len());
    for prefix in prefixes {
        for candidate in candidates {
            let mut name = String::with_capacity(prefix.len() + candidate.len());
            name.push_str(prefix);
            name.push_str(candidate);
            out.push(name);
        }
    }
    out
}
