//! Per-type metadata
//!
//! A registered type carries its construction paths, member setters, and
//! matcher strategy in a [`TypeInfo`]. Types are identified by [`TypeKey`]
//! and referenced structurally by [`TypeRef`], which can express generic
//! instances, open placeholders, and optional wrapping.

pub mod builder;
pub mod ordering;
pub mod path;

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use crate::matcher::CustomMatcher;
use crate::value::{BasicType, Value};

pub use builder::{Describe, MemberSpec, ParamDesc, PathSpec, TypeDesc, TypeDescBuilder};
pub use path::{MemberSetter, NullPolicy, ParamInfo, Path, PathKind};

/// Canonical handle for a registered type.
///
/// Concrete keys wrap the Rust `TypeId` of a closed type; open keys name a
/// generic definition that has no closed `TypeId` of its own.
#[derive(Debug, Clone, Copy)]
pub enum TypeKey {
    Concrete { id: TypeId, name: &'static str },
    Open { name: &'static str },
}

// `name` is a diagnostic label only (see `named()`); identity is the
// `TypeId` for concrete keys and the definition name for open keys, so
// equality/hashing must ignore `name` on the `Concrete` variant to keep a
// key stable across `.named()` overrides.
impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeKey::Concrete { id: a, .. }, TypeKey::Concrete { id: b, .. }) => a == b,
            (TypeKey::Open { name: a }, TypeKey::Open { name: b }) => a == b,
            _ => false,
        }
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            TypeKey::Concrete { id, .. } => id.hash(state),
            TypeKey::Open { name } => name.hash(state),
        }
    }
}

impl TypeKey {
    pub fn of<T: 'static>() -> Self {
        TypeKey::Concrete {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Key for an open generic definition, e.g. `TypeKey::open("Metadata")`.
    pub fn open(name: &'static str) -> Self {
        TypeKey::Open { name }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TypeKey::Concrete { name, .. } | TypeKey::Open { name } => name,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, TypeKey::Open { .. })
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structural reference to a type, as it appears in parameter and member
/// declarations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Basic(BasicType),
    /// A registered enum, matched terminally through its integral underlying
    /// type.
    Enum(TypeKey),
    /// A registered non-generic type.
    Named(TypeKey),
    /// A closed generic instance of an open definition.
    Generic { def: TypeKey, args: Vec<TypeRef> },
    /// Generic parameter of the enclosing target, closed during descent.
    Placeholder(u8),
    /// Nullable wrapper. Stripping is idempotent.
    Optional(Box<TypeRef>),
}

impl TypeRef {
    pub fn basic(ty: BasicType) -> Self {
        TypeRef::Basic(ty)
    }

    pub fn named<T: 'static>() -> Self {
        TypeRef::Named(TypeKey::of::<T>())
    }

    pub fn enum_of<T: 'static>() -> Self {
        TypeRef::Enum(TypeKey::of::<T>())
    }

    pub fn generic(def: TypeKey, args: Vec<TypeRef>) -> Self {
        TypeRef::Generic { def, args }
    }

    pub fn optional(inner: TypeRef) -> Self {
        TypeRef::Optional(Box::new(inner))
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, TypeRef::Optional(_))
    }

    /// Remove any number of nullable wrappers.
    pub fn strip_optional(&self) -> &TypeRef {
        let mut ty = self;
        while let TypeRef::Optional(inner) = ty {
            ty = inner;
        }
        ty
    }

    /// Substitute generic placeholders with the target's closed arguments.
    pub fn close(&self, args: &[TypeRef]) -> TypeRef {
        match self {
            TypeRef::Placeholder(i) => args
                .get(*i as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            TypeRef::Optional(inner) => TypeRef::optional(inner.close(args)),
            TypeRef::Generic { def, args: inner } => TypeRef::Generic {
                def: *def,
                args: inner.iter().map(|a| a.close(args)).collect(),
            },
            other => other.clone(),
        }
    }

    pub fn contains_placeholder(&self) -> bool {
        match self {
            TypeRef::Placeholder(_) => true,
            TypeRef::Optional(inner) => inner.contains_placeholder(),
            TypeRef::Generic { args, .. } => args.iter().any(|a| a.contains_placeholder()),
            _ => false,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Basic(b) => write!(f, "{b}"),
            TypeRef::Enum(k) | TypeRef::Named(k) => f.write_str(k.name()),
            TypeRef::Generic { def, args } => {
                write!(f, "{}<", def.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(">")
            }
            TypeRef::Placeholder(i) => write!(f, "${i}"),
            TypeRef::Optional(inner) => write!(f, "{inner}?"),
        }
    }
}

/// Open-definition link carried by a closed generic instance.
#[derive(Debug, Clone)]
pub struct GenericDecl {
    pub def: TypeKey,
    pub args: Vec<TypeRef>,
}

impl GenericDecl {
    pub fn arity(&self) -> u8 {
        self.args.len() as u8
    }
}

/// Conversion from a column integral into a registered enum value.
pub type EnumConvertFn = Arc<dyn Fn(i64) -> Option<Value> + Send + Sync>;

#[derive(Clone)]
pub struct EnumInfo {
    pub underlying: BasicType,
    pub convert: EnumConvertFn,
}

impl fmt::Debug for EnumInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnumInfo({})", self.underlying)
    }
}

/// Negotiation strategy attached to a type.
#[derive(Clone, Default)]
pub enum MatcherKind {
    /// Recursive negotiation over construction paths and members.
    #[default]
    Default,
    /// Terminal matching for basic types and enums.
    Basic,
    /// Consumer-provided strategy, overriding negotiation entirely.
    Custom(Arc<dyn CustomMatcher>),
}

impl fmt::Debug for MatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatcherKind::Default => f.write_str("Default"),
            MatcherKind::Basic => f.write_str("Basic"),
            MatcherKind::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Everything the engine knows about a registered type.
///
/// An uninitialized record carries its declarations verbatim; lazy
/// initialization (viability filtering, specificity ordering, parameterless
/// extraction) runs under the registry writer lock the first time paths or
/// members are read.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub key: TypeKey,
    /// Canonical structural reference for registry lookup.
    pub ty: TypeRef,
    pub generic: Option<GenericDecl>,
    /// Declared supertypes, consulted for assignability and specificity.
    pub implements: Vec<TypeRef>,
    pub(crate) paths: Vec<Arc<Path>>,
    pub(crate) parameterless: Option<Arc<Path>>,
    pub(crate) members: Vec<Arc<MemberSetter>>,
    pub matcher: MatcherKind,
    pub enum_info: Option<EnumInfo>,
    pub initialized: bool,
}

impl TypeInfo {
    /// Construction paths in specificity order. Empty until initialized.
    pub fn paths(&self) -> &[Arc<Path>] {
        &self.paths
    }

    pub fn parameterless(&self) -> Option<&Arc<Path>> {
        self.parameterless.as_ref()
    }

    /// Member setters in declaration order.
    pub fn members(&self) -> &[Arc<MemberSetter>] {
        &self.members
    }

    /// Closed generic arguments, or an empty slice for non-generic types.
    pub fn generic_args(&self) -> &[TypeRef] {
        self.generic.as_ref().map(|g| g.args.as_slice()).unwrap_or(&[])
    }
}
