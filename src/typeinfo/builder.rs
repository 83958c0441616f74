//! Type descriptors and their fluent builders
//!
//! A [`TypeDesc`] is the registration-time declaration of a type: its
//! construction paths, members, matcher, and generic shape. The registry
//! turns descriptors into validated, specificity-ordered [`TypeInfo`]s on
//! first use.
//!
//! # Example
//!
//! ```rust
//! use rowbind::{ParamDesc, PathSpec, TypeDesc, Value};
//!
//! struct Point {
//!     x: i32,
//!     y: i32,
//! }
//!
//! let desc = TypeDesc::of::<Point>()
//!     .path(PathSpec::constructor(
//!         vec![ParamDesc::basic::<i32>("x"), ParamDesc::basic::<i32>("y")],
//!         |mut args| {
//!             Ok(Value::custom(Point {
//!                 x: args.take()?,
//!                 y: args.take()?,
//!             }))
//!         },
//!     ))
//!     .build();
//! # let _ = desc;
//! ```

use std::any::Any;
use std::sync::Arc;

use crate::matcher::CustomMatcher;
use crate::schema::fold_name;
use crate::typeinfo::path::{MemberAssign, MemberSetter, ParamInfo, Path, PathInvoke, PathKind};
use crate::typeinfo::{EnumInfo, GenericDecl, MatcherKind, NullPolicy, TypeKey, TypeRef};
use crate::value::{BasicType, BasicValue, FromValue, PathArgs, RowError, Value};

/// A type that carries its own descriptor, enabling auto-registration when
/// it appears as a parameter or member of another registered type.
pub trait Describe: Any + Send + Sync {
    fn descriptor() -> TypeDesc;
}

/// Registration-time declaration of a target type.
pub struct TypeDesc {
    pub(crate) key: TypeKey,
    pub(crate) generic: Option<GenericDecl>,
    pub(crate) implements: Vec<TypeRef>,
    pub(crate) paths: Vec<PathSpec>,
    pub(crate) members: Vec<MemberSpec>,
    pub(crate) matcher: MatcherKind,
    pub(crate) enum_info: Option<EnumInfo>,
}

impl TypeDesc {
    /// Start a descriptor for a concrete type.
    pub fn of<T: Any + Send + Sync>() -> TypeDescBuilder {
        TypeDescBuilder {
            desc: TypeDesc {
                key: TypeKey::of::<T>(),
                generic: None,
                implements: Vec::new(),
                paths: Vec::new(),
                members: Vec::new(),
                matcher: MatcherKind::Default,
                enum_info: None,
            },
        }
    }

    /// Descriptor for an enum hydrated from an integral column.
    ///
    /// `convert` maps the column value to a variant; unmapped values raise
    /// `EnumOutOfRange` at parse time.
    pub fn enum_of<T: Any + Send + Sync>(
        underlying: BasicType,
        convert: impl Fn(i64) -> Option<T> + Send + Sync + 'static,
    ) -> TypeDesc {
        TypeDesc {
            key: TypeKey::of::<T>(),
            generic: None,
            implements: Vec::new(),
            paths: Vec::new(),
            members: Vec::new(),
            matcher: MatcherKind::Basic,
            enum_info: Some(EnumInfo {
                underlying,
                convert: Arc::new(move |i| convert(i).map(Value::custom)),
            }),
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Override the diagnostic name (defaults to the Rust type path).
    pub fn named(mut self, name: &'static str) -> Self {
        self.key = match self.key {
            TypeKey::Concrete { id, .. } => TypeKey::Concrete { id, name },
            TypeKey::Open { .. } => TypeKey::Open { name },
        };
        self
    }

    /// The structural reference this descriptor registers under.
    pub fn canonical_ref(&self) -> TypeRef {
        if self.enum_info.is_some() {
            TypeRef::Enum(self.key)
        } else if let Some(generic) = &self.generic {
            TypeRef::Generic {
                def: generic.def,
                args: generic.args.clone(),
            }
        } else {
            TypeRef::Named(self.key)
        }
    }
}

/// Fluent builder for [`TypeDesc`].
pub struct TypeDescBuilder {
    desc: TypeDesc,
}

impl TypeDescBuilder {
    /// Override the diagnostic name (defaults to the Rust type path).
    pub fn named(mut self, name: &'static str) -> Self {
        self.desc = self.desc.named(name);
        self
    }

    /// Declare this type as a closed instance of an open generic definition.
    pub fn generic(mut self, def: &'static str, args: Vec<TypeRef>) -> Self {
        self.desc.generic = Some(GenericDecl {
            def: TypeKey::open(def),
            args,
        });
        self
    }

    /// Declare a supertype; consulted for assignability and specificity.
    pub fn implements<S: 'static>(mut self) -> Self {
        self.desc.implements.push(TypeRef::named::<S>());
        self
    }

    /// Add a construction path in discovery order.
    pub fn path(mut self, spec: PathSpec) -> Self {
        self.desc.paths.push(spec);
        self
    }

    /// Add a member setter in declaration order.
    pub fn member(mut self, spec: MemberSpec) -> Self {
        self.desc.members.push(spec);
        self
    }

    pub fn matcher(mut self, matcher: MatcherKind) -> Self {
        self.desc.matcher = matcher;
        self
    }

    pub fn build(self) -> TypeDesc {
        self.desc
    }
}

/// Declaration of a construction path.
pub struct PathSpec {
    pub(crate) params: Vec<ParamDesc>,
    pub(crate) kind: PathKind,
    pub(crate) can_complete_with_members: bool,
    pub(crate) produces: Option<TypeRef>,
    pub(crate) invoke: PathInvoke,
}

impl PathSpec {
    pub fn constructor(
        params: Vec<ParamDesc>,
        invoke: impl Fn(PathArgs) -> Result<Value, RowError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            kind: PathKind::Constructor,
            can_complete_with_members: true,
            produces: None,
            invoke: Arc::new(invoke),
        }
    }

    /// A static factory declared on `declaring`.
    pub fn factory(
        declaring: TypeKey,
        params: Vec<ParamDesc>,
        invoke: impl Fn(PathArgs) -> Result<Value, RowError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            kind: PathKind::Factory {
                declaring,
                generic_arity: 0,
            },
            can_complete_with_members: true,
            produces: None,
            invoke: Arc::new(invoke),
        }
    }

    /// A generic factory whose generic parameters correspond one-to-one
    /// with the target's.
    pub fn generic_factory(
        declaring: TypeKey,
        generic_arity: u8,
        params: Vec<ParamDesc>,
        invoke: impl Fn(PathArgs) -> Result<Value, RowError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            kind: PathKind::Factory {
                declaring,
                generic_arity,
            },
            can_complete_with_members: true,
            produces: None,
            invoke: Arc::new(invoke),
        }
    }

    /// Forbid member completion after this path constructs.
    pub fn without_member_completion(mut self) -> Self {
        self.can_complete_with_members = false;
        self
    }

    /// Declare the produced type when it differs from the target (subtype
    /// returns).
    pub fn producing(mut self, ty: TypeRef) -> Self {
        self.produces = Some(ty);
        self
    }

    pub(crate) fn into_path(self, target: &TypeRef, manual: bool) -> Path {
        Path {
            kind: self.kind,
            params: self.params.into_iter().map(ParamDesc::into_param).collect(),
            produces: self.produces.unwrap_or_else(|| target.clone()),
            can_complete_with_members: self.can_complete_with_members,
            manual,
            invoke: self.invoke,
        }
    }
}

/// Declaration of a constructor parameter or a member's value slot.
pub struct ParamDesc {
    pub(crate) name: String,
    pub(crate) aliases: Vec<String>,
    pub(crate) ty: TypeRef,
    pub(crate) null_policy: Option<NullPolicy>,
    pub(crate) matcher_override: Option<Arc<dyn CustomMatcher>>,
    pub(crate) auto_desc: Option<fn() -> TypeDesc>,
}

impl ParamDesc {
    fn new(name: &str, ty: TypeRef) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            ty,
            null_policy: None,
            matcher_override: None,
            auto_desc: None,
        }
    }

    /// A basic-typed slot, e.g. `ParamDesc::basic::<i32>("order_id")`.
    pub fn basic<V: BasicValue>(name: &str) -> Self {
        Self::new(name, TypeRef::Basic(V::TYPE))
    }

    /// An optional basic-typed slot.
    pub fn basic_opt<V: BasicValue>(name: &str) -> Self {
        Self::new(name, TypeRef::optional(TypeRef::Basic(V::TYPE)))
    }

    /// A nested registered type; carries the descriptor thunk so the slot
    /// type auto-registers on first use.
    pub fn nested<T: Describe>(name: &str) -> Self {
        let mut param = Self::new(name, TypeRef::named::<T>());
        param.auto_desc = Some(T::descriptor);
        param
    }

    /// An optional nested registered type.
    pub fn nested_opt<T: Describe>(name: &str) -> Self {
        let mut param = Self::new(name, TypeRef::optional(TypeRef::named::<T>()));
        param.auto_desc = Some(T::descriptor);
        param
    }

    /// A registered enum slot.
    pub fn enum_of<T: Describe>(name: &str) -> Self {
        let mut param = Self::new(name, TypeRef::enum_of::<T>());
        param.auto_desc = Some(T::descriptor);
        param
    }

    /// An explicitly typed slot, for generic instances and placeholders.
    pub fn typed(name: &str, ty: TypeRef) -> Self {
        Self::new(name, ty)
    }

    /// A slot typed by the target's n-th generic parameter.
    pub fn placeholder(name: &str, index: u8) -> Self {
        Self::new(name, TypeRef::Placeholder(index))
    }

    /// Wrap the slot type in an optional.
    pub fn opt(mut self) -> Self {
        self.ty = TypeRef::optional(self.ty);
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.null_policy = Some(NullPolicy::NotNull);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.null_policy = Some(NullPolicy::Nullable);
        self
    }

    pub fn jump_if_null(mut self) -> Self {
        self.null_policy = Some(NullPolicy::JumpIfNull);
        self
    }

    /// Substitute the handler's value when the column is NULL.
    pub fn on_null(mut self, handler: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.null_policy = Some(NullPolicy::Custom(Arc::new(handler)));
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn CustomMatcher>) -> Self {
        self.matcher_override = Some(matcher);
        self
    }

    pub(crate) fn into_param(self) -> ParamInfo {
        let mut candidates = smallvec::SmallVec::new();
        candidates.push(fold_name(&self.name));
        let mut param = ParamInfo {
            display_name: self.name,
            candidates,
            ty: self.ty,
            null_policy: self.null_policy,
            matcher_override: self.matcher_override,
            auto_desc: self.auto_desc,
        };
        for alias in &self.aliases {
            param.add_alias(alias);
        }
        param
    }
}

/// Declaration of a member setter.
pub struct MemberSpec {
    pub(crate) param: ParamDesc,
    pub(crate) assign: MemberAssign,
}

impl MemberSpec {
    /// A basic-typed member, e.g.
    /// `MemberSpec::basic::<Order, i32>("priority", |o, v| o.priority = v)`.
    pub fn basic<T: Any + Send + Sync, V: BasicValue + 'static>(
        name: &str,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self {
        Self {
            param: ParamDesc::basic::<V>(name),
            assign: Arc::new(move |holder, value| {
                set(holder.custom_mut::<T>()?, V::from_value(value)?);
                Ok(())
            }),
        }
    }

    /// An optional basic-typed member.
    pub fn basic_opt<T: Any + Send + Sync, V: BasicValue + 'static>(
        name: &str,
        set: impl Fn(&mut T, Option<V>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            param: ParamDesc::basic_opt::<V>(name),
            assign: Arc::new(move |holder, value| {
                set(holder.custom_mut::<T>()?, Option::<V>::from_value(value)?);
                Ok(())
            }),
        }
    }

    /// A nested registered-type member.
    pub fn nested<T: Any + Send + Sync, N: Describe>(
        name: &str,
        set: impl Fn(&mut T, N) + Send + Sync + 'static,
    ) -> Self {
        Self {
            param: ParamDesc::nested::<N>(name),
            assign: Arc::new(move |holder, value| {
                set(holder.custom_mut::<T>()?, value.into_custom::<N>()?);
                Ok(())
            }),
        }
    }

    /// An optional nested registered-type member.
    pub fn nested_opt<T: Any + Send + Sync, N: Describe>(
        name: &str,
        set: impl Fn(&mut T, Option<N>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            param: ParamDesc::nested_opt::<N>(name),
            assign: Arc::new(move |holder, value| {
                set(holder.custom_mut::<T>()?, value.into_custom_opt::<N>()?);
                Ok(())
            }),
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.param = self.param.alias(alias);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.param = self.param.not_null();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.param = self.param.nullable();
        self
    }

    pub fn jump_if_null(mut self) -> Self {
        self.param = self.param.jump_if_null();
        self
    }

    pub fn on_null(mut self, handler: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.param = self.param.on_null(handler);
        self
    }

    pub(crate) fn into_setter(self, target: &TypeRef) -> MemberSetter {
        MemberSetter {
            param: self.param.into_param(),
            target_type: target.clone(),
            assign: self.assign,
        }
    }
}
