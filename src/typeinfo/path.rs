//! Construction paths, parameters, and member setters

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::matcher::CustomMatcher;
use crate::schema::fold_name;
use crate::typeinfo::{TypeDesc, TypeKey, TypeRef};
use crate::value::{PathArgs, RowError, Value};

/// Invoke closure of a construction path: consumes the negotiated arguments
/// and produces an instance of the target type.
pub type PathInvoke = Arc<dyn Fn(PathArgs) -> Result<Value, RowError> + Send + Sync>;

/// Assignment closure of a member setter: writes a value into the
/// constructed instance.
pub type MemberAssign = Arc<dyn Fn(&mut Value, Value) -> Result<(), RowError> + Send + Sync>;

/// Substitute value produced when a `Custom` null policy fires.
pub type NullHandler = Arc<dyn Fn() -> Value + Send + Sync>;

/// How a slot reacts to a database NULL.
#[derive(Clone)]
pub enum NullPolicy {
    /// Accept the null representation of the slot type.
    Nullable,
    /// Raise `NullAssignment` at parse time.
    NotNull,
    /// Branch to the nearest enclosing recovery sink, nulling the parent.
    JumpIfNull,
    /// Substitute the handler's value.
    Custom(NullHandler),
}

impl NullPolicy {
    pub fn kind(&self) -> &'static str {
        match self {
            NullPolicy::Nullable => "nullable",
            NullPolicy::NotNull => "not-null",
            NullPolicy::JumpIfNull => "jump-if-null",
            NullPolicy::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for NullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Per-slot metadata shared by constructor parameters and members.
#[derive(Clone)]
pub struct ParamInfo {
    /// Declared name, preserved for diagnostics.
    pub display_name: String,
    /// Case-folded name candidates, primary first, deduplicated.
    pub candidates: SmallVec<[String; 2]>,
    pub ty: TypeRef,
    /// Explicit annotation; `None` selects the default for the slot type.
    pub null_policy: Option<NullPolicy>,
    pub matcher_override: Option<Arc<dyn CustomMatcher>>,
    /// Descriptor thunk for auto-registration of the slot type.
    pub auto_desc: Option<fn() -> TypeDesc>,
}

impl ParamInfo {
    /// Resolve the null policy: explicit annotation wins, otherwise
    /// `Nullable` for optional slots and `NotNull` for everything else.
    pub fn effective_policy(&self) -> NullPolicy {
        match &self.null_policy {
            Some(policy) => policy.clone(),
            None if self.ty.is_optional() => NullPolicy::Nullable,
            None => NullPolicy::NotNull,
        }
    }

    pub fn policy_is_explicit(&self) -> bool {
        self.null_policy.is_some()
    }

    /// Append an alias, folding case and dropping duplicates.
    pub fn add_alias(&mut self, alias: &str) {
        let folded = fold_name(alias);
        if !self.candidates.iter().any(|c| *c == folded) {
            self.candidates.push(folded);
        }
    }
}

impl fmt::Debug for ParamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamInfo")
            .field("name", &self.display_name)
            .field("candidates", &self.candidates)
            .field("ty", &self.ty)
            .field("null_policy", &self.null_policy)
            .finish_non_exhaustive()
    }
}

/// Whether a path is a constructor or a static factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Constructor,
    Factory {
        declaring: TypeKey,
        /// Generic arity of the factory itself; non-zero only when it
        /// corresponds one-to-one with the target's generic parameters.
        generic_arity: u8,
    },
}

/// A construction entry point: `(T1, ..., Tn) -> T`.
#[derive(Clone)]
pub struct Path {
    pub kind: PathKind,
    pub params: Vec<ParamInfo>,
    /// Produced type; assignment-compatible with the target.
    pub produces: TypeRef,
    /// Whether member assignment may run after this path constructs.
    pub can_complete_with_members: bool,
    /// True when added through the manual surface rather than a descriptor.
    pub(crate) manual: bool,
    pub invoke: PathInvoke,
}

impl Path {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Short form for diagnostics, e.g. `constructor/3`.
    pub fn describe(&self) -> String {
        match self.kind {
            PathKind::Constructor => format!("constructor/{}", self.arity()),
            PathKind::Factory { declaring, .. } => {
                format!("factory({})/{}", declaring.name(), self.arity())
            }
        }
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("produces", &self.produces)
            .finish_non_exhaustive()
    }
}

/// A post-construction assignment slot.
#[derive(Clone)]
pub struct MemberSetter {
    pub param: ParamInfo,
    /// The type declaring this member.
    pub target_type: TypeRef,
    pub assign: MemberAssign,
}

impl MemberSetter {
    pub fn name(&self) -> &str {
        &self.param.display_name
    }
}

impl fmt::Debug for MemberSetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberSetter")
            .field("param", &self.param)
            .field("target_type", &self.target_type)
            .finish_non_exhaustive()
    }
}
