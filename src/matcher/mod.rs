//! Matcher core
//!
//! Recursive negotiation reconciles a row schema against a target type tree
//! and emits a parse plan. Terminal slots bind the earliest unused column
//! whose effective name matches and whose runtime type is convertible;
//! complex slots try construction paths in specificity order, rolling the
//! usage bitset back on failure, then complete the winner with member
//! assignments. Negotiation failure is a silent `None` so callers can
//! backtrack; hard configuration failures are raised at registration time.

pub mod modifier;
pub mod name_index;
pub mod usage;

use std::sync::Arc;

use tracing::{debug, trace};

use crate::plan::{ConstructPlan, EnumConvertPlan, Plan, TerminalRead};
use crate::registry::RegistrySnapshot;
use crate::schema::Schema;
use crate::typeinfo::path::{MemberSetter, NullPolicy, ParamInfo};
use crate::typeinfo::{MatcherKind, TypeInfo, TypeRef};
use crate::value::{ConvertOp, convertible};

pub use modifier::ColumnModifier;
pub use name_index::{FoldedNameIndex, NameIndex};
pub use usage::{ColumnUsage, UsageCheckpoint};

/// Consumer-provided negotiation strategy, installed on a type or a single
/// parameter to override the default matching.
pub trait CustomMatcher: Send + Sync {
    fn negotiate(
        &self,
        negotiation: &mut Negotiation<'_>,
        target: &TypeRef,
        modifier: &mut ColumnModifier,
        policy: &NullPolicy,
    ) -> Option<Plan>;
}

/// State of one negotiation run: the registry snapshot it resolves types
/// against, the schema, the name index, and the usage bitset.
pub struct Negotiation<'a> {
    snapshot: &'a RegistrySnapshot,
    schema: &'a Schema,
    index: &'a FoldedNameIndex,
    usage: ColumnUsage,
}

impl<'a> Negotiation<'a> {
    pub fn new(
        snapshot: &'a RegistrySnapshot,
        schema: &'a Schema,
        index: &'a FoldedNameIndex,
    ) -> Self {
        Self {
            snapshot,
            schema,
            index,
            usage: ColumnUsage::new(schema.len()),
        }
    }

    pub fn schema(&self) -> &Schema {
        self.schema
    }

    pub fn usage(&self) -> &ColumnUsage {
        &self.usage
    }

    /// Negotiate the root target with an empty modifier and the default
    /// policy for its optionality.
    pub fn negotiate_root(&mut self, target: &TypeRef) -> Option<Plan> {
        debug!(target = %target, columns = self.schema.len(), "negotiating parse plan");
        let policy = if target.is_optional() {
            NullPolicy::Nullable
        } else {
            NullPolicy::NotNull
        };
        let mut modifier = ColumnModifier::default();
        let plan = self.negotiate_type(target, &mut modifier, policy, false);
        if plan.is_none() {
            debug!(target = %target, "negotiation failed, no construction path matched");
        }
        plan
    }

    /// Negotiate a target type against the current modifier. Terminal
    /// targets match with an empty leaf candidate; complex targets resolve
    /// their registered [`TypeInfo`] and dispatch on its matcher kind.
    pub fn negotiate_type(
        &mut self,
        target: &TypeRef,
        modifier: &mut ColumnModifier,
        policy: NullPolicy,
        explicit: bool,
    ) -> Option<Plan> {
        let snapshot = self.snapshot;
        match target.strip_optional() {
            TypeRef::Basic(_) | TypeRef::Enum(_) => {
                let leaf = [String::new()];
                self.match_terminal(target, modifier, &leaf, policy, explicit)
            }
            TypeRef::Placeholder(_) => {
                trace!(target = %target, "unresolved placeholder reached negotiation");
                None
            }
            stripped @ (TypeRef::Named(_) | TypeRef::Generic { .. }) => {
                let info = snapshot.lookup(stripped)?.clone();
                match info.matcher.clone() {
                    MatcherKind::Custom(custom) => {
                        custom.negotiate(self, target, modifier, &policy)
                    }
                    // Basic matcher on a registered enum falls back to
                    // terminal matching through the underlying integral.
                    MatcherKind::Basic if info.enum_info.is_some() => {
                        let leaf = [String::new()];
                        self.match_terminal(target, modifier, &leaf, policy, explicit)
                    }
                    _ => self.negotiate_complex(&info, target.is_optional(), modifier, policy),
                }
            }
            TypeRef::Optional(_) => None,
        }
    }

    /// Negotiate one parameter or member slot. Basic and enum slots match
    /// terminally with the slot's own candidates as the leaf layer; complex
    /// slots push their candidates as a prefix layer and descend.
    pub fn negotiate_param(
        &mut self,
        param: &ParamInfo,
        modifier: &mut ColumnModifier,
        generic_args: &[TypeRef],
    ) -> Option<Plan> {
        let closed = param.ty.close(generic_args);
        let policy = param.effective_policy();
        let explicit = param.policy_is_explicit();

        if let Some(custom) = &param.matcher_override {
            return custom.clone().negotiate(self, &closed, modifier, &policy);
        }

        match closed.strip_optional() {
            TypeRef::Basic(_) | TypeRef::Enum(_) => {
                self.match_terminal(&closed, modifier, &param.candidates, policy, explicit)
            }
            _ => {
                modifier.push_layer(&param.candidates);
                let plan = self.negotiate_type(&closed, modifier, policy, explicit);
                modifier.pop_layer();
                plan
            }
        }
    }

    /// Terminal matching: bind the earliest unused, convertible column whose
    /// case-folded name equals any modifier-expanded candidate.
    pub fn match_terminal(
        &mut self,
        target: &TypeRef,
        modifier: &ColumnModifier,
        leaf_candidates: &[String],
        policy: NullPolicy,
        explicit: bool,
    ) -> Option<Plan> {
        let snapshot = self.snapshot;
        let optional = target.is_optional();

        // Resolve the basic type a column must convert to; enums match
        // through their underlying integral of identical width.
        let (target_basic, enum_entry) = match target.strip_optional() {
            TypeRef::Basic(b) => (*b, None),
            TypeRef::Enum(_) => {
                let info = snapshot.lookup(target.strip_optional())?.clone();
                let enum_info = info.enum_info.clone()?;
                (enum_info.underlying, Some((info.key.name(), enum_info)))
            }
            _ => return None,
        };

        let names = modifier.expand(leaf_candidates);
        let mut best: Option<u16> = None;
        for name in &names {
            for &position in self.index.positions(name) {
                let position = position as u16;
                if self.usage.is_used(position) {
                    continue;
                }
                let column = self.schema.get(position)?;
                let ok = match &enum_entry {
                    Some(_) => column.runtime_type == target_basic,
                    None => convertible(column.runtime_type, target_basic),
                };
                if ok && best.map_or(true, |b| position < b) {
                    best = Some(position);
                }
            }
        }

        let position = best?;
        let column = self.schema.get(position)?;
        self.usage.mark(position);
        trace!(column = %column.name, position, target = %target, "bound column");

        let convert = match &enum_entry {
            Some(_) => ConvertOp::Identity,
            None => ConvertOp::between(column.runtime_type, target_basic)?,
        };
        let mut plan = Plan::Terminal(TerminalRead {
            column: position,
            column_name: column.name.clone(),
            runtime_type: column.runtime_type,
            target: target_basic,
            convert,
            policy,
            check_null: explicit || column.nullable,
        });
        if let Some((enum_name, enum_info)) = enum_entry {
            plan = Plan::EnumConvert(EnumConvertPlan {
                enum_name: enum_name.to_string(),
                inner: Box::new(plan),
                convert: enum_info.convert,
            });
        }
        if optional {
            plan = Plan::NullableWrap {
                inner: Box::new(plan),
            };
        }
        Some(plan)
    }

    /// Negotiation over a complex target: construction paths in specificity
    /// order with rollback, member completion on the winner, then the
    /// parameterless fallback.
    fn negotiate_complex(
        &mut self,
        info: &TypeInfo,
        slot_optional: bool,
        modifier: &mut ColumnModifier,
        policy: NullPolicy,
    ) -> Option<Plan> {
        let generic_args = info.generic_args().to_vec();
        let nullable_result = slot_optional || matches!(policy, NullPolicy::Nullable);
        let checkpoint = self.usage.checkpoint();

        for path in info.paths() {
            trace!(target = %info.ty, path = %path.describe(), "trying construction path");
            let mut args = Vec::with_capacity(path.arity());
            let mut failed = false;
            for param in &path.params {
                match self.negotiate_param(param, modifier, &generic_args) {
                    Some(plan) => args.push(plan),
                    None => {
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                trace!(target = %info.ty, path = %path.describe(), "path failed, rolling back");
                self.usage.restore(&checkpoint);
                continue;
            }

            let members = if path.can_complete_with_members {
                self.negotiate_members(info, modifier, &generic_args)
            } else {
                Vec::new()
            };
            return Some(Plan::Construct(ConstructPlan {
                type_name: info.key.name().to_string(),
                path: path.clone(),
                args,
                members,
                policy,
                nullable_result,
            }));
        }

        // No path bound its parameters. A parameterless path still applies
        // when at least one member matches, or when the type has no members
        // at all (fully default-constructible).
        if let Some(parameterless) = info.parameterless() {
            let members = self.negotiate_members(info, modifier, &generic_args);
            if !members.is_empty() || info.members().is_empty() {
                return Some(Plan::Construct(ConstructPlan {
                    type_name: info.key.name().to_string(),
                    path: parameterless.clone(),
                    args: Vec::new(),
                    members,
                    policy,
                    nullable_result,
                }));
            }
        }

        self.usage.restore(&checkpoint);
        None
    }

    fn negotiate_members(
        &mut self,
        info: &TypeInfo,
        modifier: &mut ColumnModifier,
        generic_args: &[TypeRef],
    ) -> Vec<(Arc<MemberSetter>, Plan)> {
        let mut members = Vec::new();
        for setter in info.members() {
            // Member failures never invalidate the path; the slot is skipped.
            if let Some(plan) = self.negotiate_param(&setter.param, modifier, generic_args) {
                members.push((setter.clone(), plan));
            }
        }
        members
    }
}
