//! Type registry
//!
//! Process-wide map from type to [`TypeInfo`]. The registry is copy-on-write
//! under a single writer lock: readers clone an `Arc` snapshot and run an
//! entire negotiation against it without further synchronization; mutations
//! clone the snapshot, edit the clone, and swap it in atomically.
//!
//! Lazy initialization (viability filtering, specificity ordering,
//! parameterless extraction) happens under the writer lock the first time a
//! type's paths or members are needed; a `TypeInfo` becomes visible to
//! readers only after `initialized` is set.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::typeinfo::ordering::{self, SubtypeOracle};
use crate::typeinfo::path::{NullPolicy, Path, PathKind};
use crate::typeinfo::{
    Describe, MatcherKind, MemberSpec, PathSpec, TypeDesc, TypeInfo, TypeKey, TypeRef,
};

/// Errors raised by registration and type resolution.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no registration for type {0} and no auto-registration applies")]
    UnknownType(String),

    #[error("invalid registration for {type_name}: {reason}")]
    InvalidRegistration { type_name: String, reason: String },

    #[error("path list for {type_name} violates registry invariants at entry {index}: {reason}")]
    InvariantViolation {
        type_name: String,
        index: usize,
        reason: String,
    },
}

impl RegistryError {
    fn invalid(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        RegistryError::InvalidRegistration {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }
}

/// Closer callback of an open generic definition: materializes the
/// descriptor of a closed instance from concrete type arguments.
pub type CloseFn = Arc<dyn Fn(&[TypeRef]) -> Option<TypeDesc> + Send + Sync>;

#[derive(Clone)]
pub struct OpenDef {
    pub arity: u8,
    close: CloseFn,
}

/// Immutable registry state a negotiation runs against.
#[derive(Clone, Default)]
pub struct RegistrySnapshot {
    types: IndexMap<TypeRef, Arc<TypeInfo>>,
    by_key: IndexMap<TypeKey, TypeRef>,
    opens: IndexMap<TypeKey, OpenDef>,
}

impl RegistrySnapshot {
    /// Resolve a structural reference to its registered `TypeInfo`.
    ///
    /// Strips nullable wrappers first, then tries the exact form, then the
    /// key-indexed canonical form (a `Named` reference may resolve to a type
    /// registered under its generic or enum canonical shape).
    pub fn lookup(&self, ty: &TypeRef) -> Option<&Arc<TypeInfo>> {
        let stripped = ty.strip_optional();
        if let Some(info) = self.types.get(stripped) {
            return Some(info);
        }
        let key = match stripped {
            TypeRef::Named(key) | TypeRef::Enum(key) => key,
            _ => return None,
        };
        self.types.get(self.by_key.get(key)?)
    }

    pub fn contains(&self, ty: &TypeRef) -> bool {
        self.lookup(ty).is_some()
    }

    /// Canonical structural reference registered for a key.
    pub fn ref_for_key(&self, key: &TypeKey) -> Option<&TypeRef> {
        self.by_key.get(key)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Assignment compatibility: identity, or a declared (transitive)
    /// `implements` edge from `sub` to `sup`.
    pub fn is_assignable(&self, sub: &TypeRef, sup: &TypeRef) -> bool {
        sub == sup || self.implements_transitively(sub, sup)
    }

    fn implements_transitively(&self, sub: &TypeRef, sup: &TypeRef) -> bool {
        let mut visited: HashSet<&TypeRef> = HashSet::new();
        let mut stack: Vec<&TypeRef> = vec![sub];
        while let Some(current) = stack.pop() {
            let Some(info) = self.lookup(current) else {
                continue;
            };
            for declared in &info.implements {
                if declared == sup {
                    return true;
                }
                if visited.insert(declared) {
                    stack.push(declared);
                }
            }
        }
        false
    }
}

impl SubtypeOracle for RegistrySnapshot {
    fn is_strict_subtype(&self, sub: &TypeRef, sup: &TypeRef) -> bool {
        sub != sup && self.implements_transitively(sub, sup)
    }
}

/// Copy-on-write type registry.
pub struct TypeRegistry {
    shared: RwLock<Arc<RegistrySnapshot>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            shared: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    /// Current snapshot. The returned `Arc` stays consistent for as long as
    /// the caller holds it, regardless of later mutations.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.shared
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut RegistrySnapshot) -> Result<R, RegistryError>,
    ) -> Result<R, RegistryError> {
        let mut guard = self.shared.write().unwrap_or_else(|e| e.into_inner());
        let mut snapshot = (**guard).clone();
        // A failed mutation drops the clone; no partial state is retained.
        let result = f(&mut snapshot)?;
        *guard = Arc::new(snapshot);
        Ok(result)
    }

    /// Register a descriptor, replacing any previous registration of the
    /// same type.
    pub fn register_manual(&self, desc: TypeDesc) -> Result<(), RegistryError> {
        validate_desc(&desc)?;
        self.mutate(|snapshot| {
            insert_desc(snapshot, desc);
            Ok(())
        })
    }

    /// Resolve a self-describing type, registering it on first use.
    /// Idempotent: an existing registration is returned untouched.
    pub fn get_or_register<T: Describe>(&self) -> Result<Arc<TypeInfo>, RegistryError> {
        let key = TypeKey::of::<T>();
        if let Some(ty) = self.snapshot().ref_for_key(&key).cloned()
            && let Some(info) = self.try_get(&ty)
        {
            return Ok(info);
        }
        let desc = T::descriptor();
        validate_desc(&desc)?;
        self.mutate(|snapshot| {
            // Re-check under the writer lock; a racing registration wins.
            if snapshot.ref_for_key(&key).is_none() {
                insert_desc(snapshot, desc);
            }
            Ok(())
        })?;
        self.try_get(&TypeRef::Named(key))
            .ok_or_else(|| RegistryError::UnknownType(key.name().to_string()))
    }

    pub fn try_get(&self, ty: &TypeRef) -> Option<Arc<TypeInfo>> {
        self.snapshot().lookup(ty).cloned()
    }

    /// Register an open generic definition with a closer callback that
    /// materializes closed descriptors on demand.
    pub fn register_open(
        &self,
        def: &'static str,
        arity: u8,
        close: impl Fn(&[TypeRef]) -> Option<TypeDesc> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        self.mutate(|snapshot| {
            snapshot.opens.insert(
                TypeKey::open(def),
                OpenDef {
                    arity,
                    close: Arc::new(close),
                },
            );
            Ok(())
        })
    }

    /// Remove a registration. Returns whether anything was removed.
    pub fn unregister(&self, key: &TypeKey) -> bool {
        self.mutate(|snapshot| {
            let Some(canonical) = snapshot.by_key.shift_remove(key) else {
                return Ok(false);
            };
            snapshot.types.shift_remove(&canonical);
            Ok(true)
        })
        .unwrap_or(false)
    }

    /// Make the whole type tree reachable from `target` resolvable and
    /// initialized, and return the snapshot negotiation should run against.
    ///
    /// This is where closed generic instances materialize through their
    /// open definition and where descriptor thunks on parameters
    /// auto-register nested types.
    pub fn prepare(&self, target: &TypeRef) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        let snapshot = self.snapshot();
        let mut visited = HashSet::new();
        if is_prepared(&snapshot, target, &mut visited) {
            return Ok(snapshot);
        }

        let mut guard = self.shared.write().unwrap_or_else(|e| e.into_inner());
        let mut snapshot = (**guard).clone();
        let mut visited = HashSet::new();
        prepare_rec(&mut snapshot, target, None, &mut visited)?;
        let snapshot = Arc::new(snapshot);
        *guard = snapshot.clone();
        Ok(snapshot)
    }

    /// Force lazy initialization of a type and everything reachable from
    /// it, without keeping the snapshot.
    pub fn ensure_initialized(&self, target: &TypeRef) -> Result<(), RegistryError> {
        self.prepare(target).map(|_| ())
    }

    // --- mutation surface ---

    /// Add a construction path. The path is validated immediately and
    /// settles after the last existing path that is more specific than it.
    pub fn add_path(&self, target: &TypeRef, spec: PathSpec) -> Result<(), RegistryError> {
        self.mutate(|snapshot| {
            let mut info = take_initialized(snapshot, target)?;
            let path = spec.into_path(&info.ty, true);
            validate_path(snapshot, &info, &path).map_err(|reason| {
                RegistryError::invalid(info.key.name(), reason)
            })?;
            if path.arity() == 0 {
                info.parameterless = Some(Arc::new(path));
            } else {
                ordering::insert_manual(&mut info.paths, Arc::new(path), snapshot);
            }
            store(snapshot, info);
            Ok(())
        })
    }

    /// Replace the path list wholesale. Every entry is validated; the first
    /// failure raises [`RegistryError::InvariantViolation`] and nothing is
    /// replaced.
    pub fn set_paths(&self, target: &TypeRef, specs: Vec<PathSpec>) -> Result<(), RegistryError> {
        self.mutate(|snapshot| {
            let mut info = take_initialized(snapshot, target)?;
            let mut paths = Vec::with_capacity(specs.len());
            let mut parameterless = None;
            for (index, spec) in specs.into_iter().enumerate() {
                let path = spec.into_path(&info.ty, true);
                validate_path(snapshot, &info, &path).map_err(|reason| {
                    RegistryError::InvariantViolation {
                        type_name: info.key.name().to_string(),
                        index,
                        reason,
                    }
                })?;
                if path.arity() == 0 {
                    parameterless.get_or_insert(Arc::new(path));
                } else {
                    paths.push(Arc::new(path));
                }
            }
            info.paths = paths;
            info.parameterless = parameterless;
            store(snapshot, info);
            Ok(())
        })
    }

    /// Append a member setter in declaration order.
    pub fn add_member(&self, target: &TypeRef, spec: MemberSpec) -> Result<(), RegistryError> {
        self.mutate(|snapshot| {
            let mut info = take_info(snapshot, target)?;
            info.members.push(Arc::new(spec.into_setter(&info.ty)));
            store(snapshot, info);
            Ok(())
        })
    }

    /// Replace the member list wholesale.
    pub fn set_members(&self, target: &TypeRef, specs: Vec<MemberSpec>) -> Result<(), RegistryError> {
        self.mutate(|snapshot| {
            let mut info = take_info(snapshot, target)?;
            info.members = specs
                .into_iter()
                .map(|spec| Arc::new(spec.into_setter(&info.ty)))
                .collect();
            store(snapshot, info);
            Ok(())
        })
    }

    /// Add a name alias to the parameter or member whose primary name
    /// matches `name` case-insensitively.
    pub fn add_alias(&self, target: &TypeRef, name: &str, alias: &str) -> Result<(), RegistryError> {
        self.update_slot(target, name, |param| param.add_alias(alias))
    }

    /// Override the null policy of the parameter or member named `name`.
    pub fn set_null_policy(
        &self,
        target: &TypeRef,
        name: &str,
        policy: NullPolicy,
    ) -> Result<(), RegistryError> {
        self.update_slot(target, name, move |param| {
            param.null_policy = Some(policy.clone());
        })
    }

    /// Install a matcher strategy on a registered type.
    pub fn install_matcher(
        &self,
        target: &TypeRef,
        matcher: MatcherKind,
    ) -> Result<(), RegistryError> {
        self.mutate(|snapshot| {
            let mut info = take_info(snapshot, target)?;
            info.matcher = matcher;
            store(snapshot, info);
            Ok(())
        })
    }

    fn update_slot(
        &self,
        target: &TypeRef,
        name: &str,
        update: impl Fn(&mut crate::typeinfo::path::ParamInfo),
    ) -> Result<(), RegistryError> {
        let folded = crate::schema::fold_name(name);
        self.mutate(|snapshot| {
            let mut info = take_info(snapshot, target)?;
            let mut touched = false;

            let mut rewrite = |path: &Arc<Path>| -> Arc<Path> {
                if path.params.iter().any(|p| p.candidates.first() == Some(&folded)) {
                    let mut path = (**path).clone();
                    for param in &mut path.params {
                        if param.candidates.first() == Some(&folded) {
                            update(param);
                            touched = true;
                        }
                    }
                    Arc::new(path)
                } else {
                    path.clone()
                }
            };
            info.paths = info.paths.iter().map(&mut rewrite).collect();
            info.parameterless = info.parameterless.as_ref().map(&mut rewrite);

            info.members = info
                .members
                .iter()
                .map(|setter| {
                    if setter.param.candidates.first() == Some(&folded) {
                        let mut setter = (**setter).clone();
                        update(&mut setter.param);
                        touched = true;
                        Arc::new(setter)
                    } else {
                        setter.clone()
                    }
                })
                .collect();

            if !touched {
                return Err(RegistryError::invalid(
                    info.key.name(),
                    format!("no parameter or member named '{name}'"),
                ));
            }
            store(snapshot, info);
            Ok(())
        })
    }
}

// --- snapshot helpers ---

fn insert_desc(snapshot: &mut RegistrySnapshot, desc: TypeDesc) {
    let key = desc.key;
    let canonical = desc.canonical_ref();
    debug!(ty = %canonical, "registering type");
    // A replacement may change the canonical shape; drop the stale entry.
    if let Some(previous) = snapshot.by_key.get(&key).cloned()
        && previous != canonical
    {
        snapshot.types.shift_remove(&previous);
    }
    let info = TypeInfo {
        key,
        ty: canonical.clone(),
        generic: desc.generic,
        implements: desc.implements,
        paths: desc
            .paths
            .into_iter()
            .map(|spec| Arc::new(spec.into_path(&canonical, false)))
            .collect(),
        parameterless: None,
        members: desc
            .members
            .into_iter()
            .map(|spec| Arc::new(spec.into_setter(&canonical)))
            .collect(),
        matcher: desc.matcher,
        enum_info: desc.enum_info,
        initialized: false,
    };
    snapshot.by_key.insert(key, canonical.clone());
    snapshot.types.insert(canonical, Arc::new(info));
}

fn store(snapshot: &mut RegistrySnapshot, info: TypeInfo) {
    snapshot.types.insert(info.ty.clone(), Arc::new(info));
}

fn take_info(snapshot: &RegistrySnapshot, target: &TypeRef) -> Result<TypeInfo, RegistryError> {
    snapshot
        .lookup(target)
        .map(|info| (**info).clone())
        .ok_or_else(|| RegistryError::UnknownType(target.to_string()))
}

/// Fetch a type for path mutation, forcing lazy initialization first so the
/// manual insertion rule applies to the ordered list.
fn take_initialized(
    snapshot: &mut RegistrySnapshot,
    target: &TypeRef,
) -> Result<TypeInfo, RegistryError> {
    let info = take_info(snapshot, target)?;
    if info.initialized {
        return Ok(info);
    }
    let info = initialize_info(snapshot, info)?;
    store(snapshot, info.clone());
    Ok(info)
}

// --- registration-time validation ---

/// Checks that need no registry state: enum shape and factory declarations.
fn validate_desc(desc: &TypeDesc) -> Result<(), RegistryError> {
    if let Some(enum_info) = &desc.enum_info
        && !enum_info.underlying.is_integral()
    {
        return Err(RegistryError::invalid(
            desc.key.name(),
            format!("enum underlying type {} is not integral", enum_info.underlying),
        ));
    }

    let target_arity = desc.generic.as_ref().map(|g| g.arity()).unwrap_or(0);
    for spec in &desc.paths {
        validate_factory_kind(&spec.kind, desc.key, desc.generic.as_ref().map(|g| g.def), target_arity)
            .map_err(|reason| RegistryError::invalid(desc.key.name(), reason))?;
    }
    Ok(())
}

fn validate_factory_kind(
    kind: &PathKind,
    target: TypeKey,
    target_def: Option<TypeKey>,
    target_arity: u8,
) -> Result<(), String> {
    let PathKind::Factory {
        declaring,
        generic_arity,
    } = kind
    else {
        return Ok(());
    };
    // An open declaring type is only acceptable when it is the target's own
    // generic definition.
    if declaring.is_open() && Some(*declaring) != target_def {
        return Err(format!(
            "factory declaring type {} is generic and differs from the target",
            declaring.name()
        ));
    }
    // A generic factory's parameters must correspond one-to-one with the
    // target's generic parameters.
    if *generic_arity != 0 && *generic_arity != target_arity {
        return Err(format!(
            "factory on {} has generic arity {} but the target has {}",
            target.name(),
            generic_arity,
            target_arity
        ));
    }
    Ok(())
}

/// Full validation of a manually added path: factory declaration, parameter
/// viability, and stack-equivalent return.
fn validate_path(
    snapshot: &RegistrySnapshot,
    info: &TypeInfo,
    path: &Path,
) -> Result<(), String> {
    validate_factory_kind(
        &path.kind,
        info.key,
        info.generic.as_ref().map(|g| g.def),
        info.generic.as_ref().map(|g| g.arity()).unwrap_or(0),
    )?;

    let arity = info.generic.as_ref().map(|g| g.arity()).unwrap_or(0);
    for param in &path.params {
        if !param_viable(snapshot, &param.ty, param.auto_desc.is_some(), arity) {
            return Err(format!(
                "parameter '{}' has non-viable type {}",
                param.display_name, param.ty
            ));
        }
    }

    let produces = path.produces.close(info.generic_args());
    if !snapshot.is_assignable(&produces, &info.ty) {
        return Err(format!(
            "produced type {produces} is not assignment-compatible with {}",
            info.ty
        ));
    }
    Ok(())
}

/// A parameter type is viable when it is basic, a generic parameter of the
/// target, a registered (or self-describing) type, or an instance of a
/// registered open definition with viable arguments.
fn param_viable(
    snapshot: &RegistrySnapshot,
    ty: &TypeRef,
    has_auto_desc: bool,
    target_arity: u8,
) -> bool {
    match ty {
        TypeRef::Basic(_) => true,
        TypeRef::Optional(inner) => param_viable(snapshot, inner, has_auto_desc, target_arity),
        TypeRef::Placeholder(i) => *i < target_arity,
        TypeRef::Named(_) | TypeRef::Enum(_) => has_auto_desc || snapshot.contains(ty),
        TypeRef::Generic { def, args } => {
            (snapshot.contains(ty) || snapshot.opens.contains_key(def))
                && args
                    .iter()
                    .all(|arg| param_viable(snapshot, arg, false, target_arity))
        }
    }
}

// --- lazy initialization ---

/// Turn a declared `TypeInfo` into its initialized form: drop non-viable
/// paths silently, reject incompatible returns, split out the parameterless
/// path, and order the rest by specificity.
fn initialize_info(
    snapshot: &RegistrySnapshot,
    info: TypeInfo,
) -> Result<TypeInfo, RegistryError> {
    let mut info = info;
    let arity = info.generic.as_ref().map(|g| g.arity()).unwrap_or(0);

    let mut kept: Vec<Arc<Path>> = Vec::with_capacity(info.paths.len());
    let mut parameterless: Option<Arc<Path>> = None;
    let drained_paths: Vec<Arc<Path>> = info.paths.drain(..).collect();
    for path in drained_paths {
        let viable = path.params.iter().all(|param| {
            param_viable(snapshot, &param.ty, param.auto_desc.is_some(), arity)
        });
        if !viable {
            debug!(ty = %info.ty, path = %path.describe(), "dropping non-viable path");
            continue;
        }

        let produces = path.produces.close(info.generic_args());
        if !snapshot.is_assignable(&produces, &info.ty) {
            return Err(RegistryError::invalid(
                info.key.name(),
                format!(
                    "path {} produces {produces}, not assignment-compatible with {}",
                    path.describe(),
                    info.ty
                ),
            ));
        }

        if path.arity() == 0 {
            parameterless.get_or_insert(path);
        } else {
            kept.push(path);
        }
    }

    ordering::reorder_by_specificity(&mut kept, snapshot);
    info.paths = kept;
    info.parameterless = parameterless;
    info.initialized = true;
    Ok(info)
}

// --- transitive preparation ---

fn is_prepared(
    snapshot: &RegistrySnapshot,
    ty: &TypeRef,
    visited: &mut HashSet<TypeRef>,
) -> bool {
    let stripped = ty.strip_optional();
    if matches!(stripped, TypeRef::Basic(_) | TypeRef::Placeholder(_)) {
        return true;
    }
    if !visited.insert(stripped.clone()) {
        return true;
    }
    let Some(info) = snapshot.lookup(stripped) else {
        return false;
    };
    if !info.initialized {
        return false;
    }
    let info = info.clone();
    let args = info.generic_args();
    info.paths
        .iter()
        .flat_map(|path| path.params.iter())
        .chain(info.members.iter().map(|m| &m.param))
        .all(|param| is_prepared(snapshot, &param.ty.close(args), visited))
}

fn prepare_rec(
    snapshot: &mut RegistrySnapshot,
    ty: &TypeRef,
    auto_desc: Option<fn() -> TypeDesc>,
    visited: &mut HashSet<TypeRef>,
) -> Result<(), RegistryError> {
    let stripped = ty.strip_optional().clone();
    if matches!(stripped, TypeRef::Basic(_) | TypeRef::Placeholder(_)) {
        return Ok(());
    }
    if !visited.insert(stripped.clone()) {
        return Ok(());
    }

    if snapshot.lookup(&stripped).is_none() {
        if let Some(thunk) = auto_desc {
            let desc = thunk();
            validate_desc(&desc)?;
            insert_desc(snapshot, desc);
        } else if let TypeRef::Generic { def, args } = &stripped {
            let open = snapshot
                .opens
                .get(def)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownType(stripped.to_string()))?;
            if args.len() != usize::from(open.arity) {
                return Err(RegistryError::invalid(
                    def.name(),
                    format!("expected {} generic arguments, got {}", open.arity, args.len()),
                ));
            }
            let desc = (open.close)(args)
                .ok_or_else(|| RegistryError::UnknownType(stripped.to_string()))?;
            validate_desc(&desc)?;
            insert_desc(snapshot, desc);
        } else {
            return Err(RegistryError::UnknownType(stripped.to_string()));
        }
    }

    let info = snapshot
        .lookup(&stripped)
        .cloned()
        .ok_or_else(|| RegistryError::UnknownType(stripped.to_string()))?;
    let info = if info.initialized {
        info
    } else {
        let initialized = initialize_info(snapshot, (*info).clone())?;
        store(snapshot, initialized.clone());
        Arc::new(initialized)
    };

    let args = info.generic_args().to_vec();
    let params = info
        .paths
        .iter()
        .flat_map(|path| path.params.iter())
        .chain(info.members.iter().map(|m| &m.param));
    for param in params {
        prepare_rec(snapshot, &param.ty.close(&args), param.auto_desc, visited)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo::ParamDesc;
    use crate::value::{BasicType, Value};

    struct Point {
        #[allow(dead_code)]
        x: i32,
        #[allow(dead_code)]
        y: i32,
    }

    impl Describe for Point {
        fn descriptor() -> TypeDesc {
            TypeDesc::of::<Point>()
                .path(PathSpec::constructor(
                    vec![ParamDesc::basic::<i32>("x"), ParamDesc::basic::<i32>("y")],
                    |mut args| {
                        Ok(Value::custom(Point {
                            x: args.take()?,
                            y: args.take()?,
                        }))
                    },
                ))
                .build()
        }
    }

    struct Segment {
        #[allow(dead_code)]
        start: Point,
    }

    impl Describe for Segment {
        fn descriptor() -> TypeDesc {
            TypeDesc::of::<Segment>()
                .path(PathSpec::constructor(
                    vec![ParamDesc::nested::<Point>("start")],
                    |mut args| {
                        Ok(Value::custom(Segment {
                            start: args.take_nested()?,
                        }))
                    },
                ))
                .build()
        }
    }

    #[test]
    fn test_get_or_register_is_idempotent() {
        let registry = TypeRegistry::new();
        let first = registry.get_or_register::<Point>().unwrap();
        let second = registry.get_or_register::<Point>().unwrap();
        assert_eq!(first.key, second.key);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_lookup_strips_optional_idempotently() {
        let registry = TypeRegistry::new();
        registry.get_or_register::<Point>().unwrap();

        let once = TypeRef::optional(TypeRef::named::<Point>());
        let twice = TypeRef::optional(once.clone());
        let snapshot = registry.snapshot();
        assert!(snapshot.lookup(&once).is_some());
        assert_eq!(
            snapshot.lookup(&once).unwrap().key,
            snapshot.lookup(&twice).unwrap().key
        );
    }

    #[test]
    fn test_unknown_type_resolution_fails() {
        let registry = TypeRegistry::new();
        let result = registry.prepare(&TypeRef::named::<Point>());
        assert!(matches!(result, Err(RegistryError::UnknownType(_))));
    }

    #[test]
    fn test_prepare_auto_registers_nested_described_types() {
        let registry = TypeRegistry::new();
        registry.get_or_register::<Segment>().unwrap();

        let snapshot = registry.prepare(&TypeRef::named::<Segment>()).unwrap();
        let nested = snapshot.lookup(&TypeRef::named::<Point>());
        assert!(nested.is_some(), "Point should auto-register via its thunk");
        assert!(nested.unwrap().initialized);
    }

    #[test]
    fn test_prepare_initializes_lazily() {
        let registry = TypeRegistry::new();
        registry.get_or_register::<Point>().unwrap();
        assert!(!registry.try_get(&TypeRef::named::<Point>()).unwrap().initialized);

        registry.prepare(&TypeRef::named::<Point>()).unwrap();
        assert!(registry.try_get(&TypeRef::named::<Point>()).unwrap().initialized);
    }

    #[test]
    fn test_non_viable_paths_drop_silently() {
        struct Unregistered;
        struct Holder;

        impl Describe for Holder {
            fn descriptor() -> TypeDesc {
                TypeDesc::of::<Holder>()
                    .path(PathSpec::constructor(
                        vec![ParamDesc::typed(
                            "mystery",
                            TypeRef::named::<Unregistered>(),
                        )],
                        |_| Ok(Value::custom(Holder)),
                    ))
                    .path(PathSpec::constructor(vec![], |_| Ok(Value::custom(Holder))))
                    .build()
            }
        }

        let registry = TypeRegistry::new();
        registry.get_or_register::<Holder>().unwrap();
        registry.prepare(&TypeRef::named::<Holder>()).unwrap();

        let info = registry.try_get(&TypeRef::named::<Holder>()).unwrap();
        assert!(info.paths().is_empty(), "non-viable path should be dropped");
        assert!(info.parameterless().is_some());
    }

    #[test]
    fn test_manual_path_with_non_viable_param_is_rejected() {
        struct Unregistered;

        let registry = TypeRegistry::new();
        registry.get_or_register::<Point>().unwrap();

        let result = registry.add_path(
            &TypeRef::named::<Point>(),
            PathSpec::constructor(
                vec![ParamDesc::typed("bad", TypeRef::named::<Unregistered>())],
                |_| Ok(Value::Null),
            ),
        );
        assert!(matches!(
            result,
            Err(RegistryError::InvalidRegistration { .. })
        ));
    }

    #[test]
    fn test_set_paths_reports_first_invalid_entry() {
        struct Unregistered;

        let registry = TypeRegistry::new();
        registry.get_or_register::<Point>().unwrap();

        let result = registry.set_paths(
            &TypeRef::named::<Point>(),
            vec![
                PathSpec::constructor(vec![ParamDesc::basic::<i32>("x")], |_| Ok(Value::Null)),
                PathSpec::constructor(
                    vec![ParamDesc::typed("bad", TypeRef::named::<Unregistered>())],
                    |_| Ok(Value::Null),
                ),
            ],
        );
        assert!(matches!(
            result,
            Err(RegistryError::InvariantViolation { index: 1, .. })
        ));
    }

    #[test]
    fn test_add_alias_reaches_path_params() {
        let registry = TypeRegistry::new();
        registry.get_or_register::<Point>().unwrap();
        registry
            .add_alias(&TypeRef::named::<Point>(), "x", "pos_x")
            .unwrap();

        let info = registry.try_get(&TypeRef::named::<Point>()).unwrap();
        let param = &info.paths()[0].params[0];
        assert!(param.candidates.iter().any(|c| c == "pos_x"));
    }

    #[test]
    fn test_add_alias_unknown_slot_fails() {
        let registry = TypeRegistry::new();
        registry.get_or_register::<Point>().unwrap();
        let result = registry.add_alias(&TypeRef::named::<Point>(), "nope", "alias");
        assert!(matches!(
            result,
            Err(RegistryError::InvalidRegistration { .. })
        ));
    }

    #[test]
    fn test_declared_supertype_enables_assignability() {
        struct Base;
        struct Derived;

        let registry = TypeRegistry::new();
        registry
            .register_manual(TypeDesc::of::<Base>().build())
            .unwrap();
        registry
            .register_manual(TypeDesc::of::<Derived>().implements::<Base>().build())
            .unwrap();

        let snapshot = registry.snapshot();
        assert!(snapshot.is_assignable(&TypeRef::named::<Derived>(), &TypeRef::named::<Base>()));
        assert!(!snapshot.is_assignable(&TypeRef::named::<Base>(), &TypeRef::named::<Derived>()));
        assert!(snapshot.is_strict_subtype(&TypeRef::named::<Derived>(), &TypeRef::named::<Base>()));
    }

    #[test]
    fn test_unregister_removes_type() {
        let registry = TypeRegistry::new();
        registry.get_or_register::<Point>().unwrap();
        assert!(registry.unregister(&TypeKey::of::<Point>()));
        assert!(registry.try_get(&TypeRef::named::<Point>()).is_none());
        assert!(!registry.unregister(&TypeKey::of::<Point>()));
    }

    #[test]
    fn test_open_definition_closes_on_demand() {
        struct Cell {
            #[allow(dead_code)]
            value: i64,
        }

        let registry = TypeRegistry::new();
        registry
            .register_open("Cell", 1, |args| {
                if args != [TypeRef::Basic(BasicType::I64)] {
                    return None;
                }
                Some(
                    TypeDesc::of::<Cell>()
                        .generic("Cell", vec![TypeRef::Basic(BasicType::I64)])
                        .path(PathSpec::constructor(
                            vec![ParamDesc::placeholder("value", 0)],
                            |mut args| {
                                Ok(Value::custom(Cell {
                                    value: args.take()?,
                                }))
                            },
                        ))
                        .build(),
                )
            })
            .unwrap();

        let closed = TypeRef::generic(
            TypeKey::open("Cell"),
            vec![TypeRef::Basic(BasicType::I64)],
        );
        let snapshot = registry.prepare(&closed).unwrap();
        let info = snapshot.lookup(&closed).expect("closed instance registered");
        assert!(info.initialized);
        assert_eq!(info.paths()[0].params[0].ty, TypeRef::Placeholder(0));
    }

    #[test]
    fn test_generic_factory_arity_mismatch_rejected() {
        struct Pair;

        let desc = TypeDesc::of::<Pair>()
            .generic(
                "Pair",
                vec![TypeRef::Basic(BasicType::I32), TypeRef::Basic(BasicType::I32)],
            )
            .path(PathSpec::generic_factory(
                TypeKey::of::<Pair>(),
                1,
                vec![],
                |_| Ok(Value::custom(Pair)),
            ))
            .build();

        let registry = TypeRegistry::new();
        assert!(matches!(
            registry.register_manual(desc),
            Err(RegistryError::InvalidRegistration { .. })
        ));
    }
}
