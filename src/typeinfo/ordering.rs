//! Specificity ordering of construction paths
//!
//! Paths are listed in discovery order, then locally bubbled so that a more
//! specific path sits ahead of every less specific one it dominates.
//! Unrelated paths keep their discovery order; this is not a global sort.

use std::sync::Arc;

use crate::typeinfo::path::Path;
use crate::typeinfo::TypeRef;

/// Subtype oracle consulted during specificity comparison. Implemented by
/// the registry snapshot over declared `implements` edges.
pub trait SubtypeOracle {
    /// True when `sub` is a strict subtype of `sup` (never reflexive).
    fn is_strict_subtype(&self, sub: &TypeRef, sup: &TypeRef) -> bool;
}

/// An oracle with no subtype edges; identity-only comparison.
pub struct NoSubtypes;

impl SubtypeOracle for NoSubtypes {
    fn is_strict_subtype(&self, _sub: &TypeRef, _sup: &TypeRef) -> bool {
        false
    }
}

/// Path `a` is more specific than `b` iff it has at least as many
/// parameters and, position by position over `b`'s parameters, each of its
/// types is the same as or a strict subtype of `b`'s.
pub fn is_more_specific(a: &Path, b: &Path, oracle: &dyn SubtypeOracle) -> bool {
    if a.arity() < b.arity() {
        return false;
    }
    b.params.iter().zip(&a.params).all(|(bp, ap)| {
        ap.ty == bp.ty || oracle.is_strict_subtype(&ap.ty, &bp.ty)
    })
}

/// Move-forward pass over a discovery-ordered list: each path that is more
/// specific than some earlier path moves to the slot immediately before the
/// earliest such path.
pub fn reorder_by_specificity(paths: &mut Vec<Arc<Path>>, oracle: &dyn SubtypeOracle) {
    for i in 1..paths.len() {
        let slot = (0..i).find(|&j| is_more_specific(&paths[i], &paths[j], oracle));
        if let Some(j) = slot {
            let path = paths.remove(i);
            paths.insert(j, path);
        }
    }
}

/// Insert a manually added path: it attempts the front of the list and
/// settles immediately after the last existing path that is more specific
/// than it.
pub fn insert_manual(paths: &mut Vec<Arc<Path>>, path: Arc<Path>, oracle: &dyn SubtypeOracle) {
    let slot = (0..paths.len())
        .rev()
        .find(|&k| is_more_specific(&paths[k], &path, oracle))
        .map(|k| k + 1)
        .unwrap_or(0);
    paths.insert(slot, path);
}

/// Check the ordering invariant: for every pair where `P` precedes `Q`,
/// either `P` is not less specific than `Q`, or `P` was manually pinned.
pub fn ordering_invariant_holds(paths: &[Arc<Path>], oracle: &dyn SubtypeOracle) -> bool {
    for (i, p) in paths.iter().enumerate() {
        for q in &paths[i + 1..] {
            let p_less_specific = is_more_specific(q, p, oracle) && !is_more_specific(p, q, oracle);
            if p_less_specific && !p.manual {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo::path::{ParamInfo, PathKind};
    use crate::value::{BasicType, Value};
    use smallvec::smallvec;

    fn param(name: &str, ty: TypeRef) -> ParamInfo {
        ParamInfo {
            display_name: name.to_string(),
            candidates: smallvec![name.to_lowercase()],
            ty,
            null_policy: None,
            matcher_override: None,
            auto_desc: None,
        }
    }

    fn path(param_types: &[BasicType], manual: bool) -> Arc<Path> {
        Arc::new(Path {
            kind: PathKind::Constructor,
            params: param_types
                .iter()
                .enumerate()
                .map(|(i, ty)| param(&format!("p{i}"), TypeRef::Basic(*ty)))
                .collect(),
            produces: TypeRef::Basic(BasicType::I32),
            can_complete_with_members: true,
            manual,
            invoke: Arc::new(|_| Ok(Value::Null)),
        })
    }

    #[test]
    fn test_longer_path_with_same_prefix_is_more_specific() {
        let short = path(&[BasicType::Text], false);
        let long = path(&[BasicType::Text, BasicType::Text], false);
        assert!(is_more_specific(&long, &short, &NoSubtypes));
        assert!(!is_more_specific(&short, &long, &NoSubtypes));
    }

    #[test]
    fn test_differing_types_are_unrelated() {
        let a = path(&[BasicType::Text, BasicType::Text], false);
        let b = path(&[BasicType::I32, BasicType::I32], false);
        assert!(!is_more_specific(&a, &b, &NoSubtypes));
        assert!(!is_more_specific(&b, &a, &NoSubtypes));
    }

    #[test]
    fn test_reorder_bubbles_specific_path_forward() {
        let short = path(&[BasicType::Text], false);
        let unrelated = path(&[BasicType::I32], false);
        let long = path(&[BasicType::Text, BasicType::Text], false);
        let mut paths = vec![short.clone(), unrelated.clone(), long.clone()];

        reorder_by_specificity(&mut paths, &NoSubtypes);

        assert_eq!(paths[0].arity(), 2, "long path should move to the front");
        assert_eq!(paths[1].arity(), 1);
        assert!(ordering_invariant_holds(&paths, &NoSubtypes));
    }

    #[test]
    fn test_reorder_keeps_unrelated_discovery_order() {
        let a = path(&[BasicType::I32], false);
        let b = path(&[BasicType::Text], false);
        let c = path(&[BasicType::Bool], false);
        let mut paths = vec![a, b, c];
        let before: Vec<usize> = paths.iter().map(|p| p.arity()).collect();

        reorder_by_specificity(&mut paths, &NoSubtypes);

        let after: Vec<usize> = paths.iter().map(|p| p.arity()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_manual_insert_front_when_nothing_more_specific() {
        let existing = path(&[BasicType::I32], false);
        let mut paths = vec![existing];
        let added = path(&[BasicType::Text], true);

        insert_manual(&mut paths, added, &NoSubtypes);

        assert!(paths[0].manual, "manual path should land at the front");
    }

    #[test]
    fn test_manual_insert_settles_after_more_specific() {
        let specific = path(&[BasicType::Text, BasicType::Text], false);
        let mut paths = vec![specific];
        let added = path(&[BasicType::Text], true);

        insert_manual(&mut paths, added, &NoSubtypes);

        assert_eq!(paths[0].arity(), 2);
        assert!(paths[1].manual);
    }
}
