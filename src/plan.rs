//! Plan tree
//!
//! The immutable intermediate representation produced by negotiation and
//! consumed by the code generator. Each node carries enough information
//! (column indices, types, null policy, convert operator) to lower without
//! consulting the registry again. The plan is stored alongside its compiled
//! parser in the cache.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::typeinfo::path::{MemberSetter, NullPolicy, Path};
use crate::typeinfo::EnumConvertFn;
use crate::value::{BasicType, ConvertOp};

/// One node of the parse plan.
#[derive(Clone)]
pub enum Plan {
    /// Read one column and convert it to the slot type.
    Terminal(TerminalRead),
    /// Invoke a construction path, then apply member assignments.
    Construct(ConstructPlan),
    /// Convert an integral read into a registered enum value.
    EnumConvert(EnumConvertPlan),
    /// Nullable wrapper around a terminal read.
    NullableWrap { inner: Box<Plan> },
}

#[derive(Clone)]
pub struct TerminalRead {
    pub column: u16,
    /// Schema name of the matched column, for diagnostics.
    pub column_name: String,
    pub runtime_type: BasicType,
    pub target: BasicType,
    pub convert: ConvertOp,
    pub policy: NullPolicy,
    /// Whether the lowered read tests for NULL before converting. Set when
    /// the policy is explicit or the column is schema-nullable.
    pub check_null: bool,
}

#[derive(Clone)]
pub struct ConstructPlan {
    pub type_name: String,
    pub path: Arc<Path>,
    /// Child plans in parameter order.
    pub args: Vec<Plan>,
    /// Member assignments in declaration order.
    pub members: Vec<(Arc<MemberSetter>, Plan)>,
    pub policy: NullPolicy,
    /// True when the slot this construct fills is optional. The lowered
    /// node then acts as a recovery sink for descendant jump-if-null reads.
    pub nullable_result: bool,
}

#[derive(Clone)]
pub struct EnumConvertPlan {
    pub enum_name: String,
    pub inner: Box<Plan>,
    pub convert: EnumConvertFn,
}

impl Plan {
    /// Column positions consumed by this plan, in evaluation order.
    pub fn used_columns(&self) -> Vec<u16> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<u16>) {
        match self {
            Plan::Terminal(t) => out.push(t.column),
            Plan::NullableWrap { inner } => inner.collect_columns(out),
            Plan::EnumConvert(e) => e.inner.collect_columns(out),
            Plan::Construct(c) => {
                for arg in &c.args {
                    arg.collect_columns(out);
                }
                for (_, plan) in &c.members {
                    plan.collect_columns(out);
                }
            }
        }
    }

    /// Closure-free rendering for logging, snapshots, and JSON diagnostics.
    pub fn summary(&self) -> PlanSummary {
        match self {
            Plan::Terminal(t) => PlanSummary::Terminal {
                column: t.column,
                name: t.column_name.clone(),
                runtime: t.runtime_type.into(),
                target: t.target.into(),
                policy: t.policy.kind(),
                checked: t.check_null,
            },
            Plan::NullableWrap { inner } => PlanSummary::Optional {
                inner: Box::new(inner.summary()),
            },
            Plan::EnumConvert(e) => PlanSummary::EnumConvert {
                enum_name: e.enum_name.clone(),
                inner: Box::new(e.inner.summary()),
            },
            Plan::Construct(c) => PlanSummary::Construct {
                type_name: c.type_name.clone(),
                path: c.path.describe(),
                sink: c.nullable_result,
                args: c.args.iter().map(Plan::summary).collect(),
                members: c
                    .members
                    .iter()
                    .map(|(setter, plan)| MemberSummary {
                        member: setter.name().to_string(),
                        plan: plan.summary(),
                    })
                    .collect(),
            },
        }
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Serializable view of a plan tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum PlanSummary {
    Terminal {
        column: u16,
        name: String,
        runtime: &'static str,
        target: &'static str,
        policy: &'static str,
        checked: bool,
    },
    Construct {
        type_name: String,
        path: String,
        sink: bool,
        args: Vec<PlanSummary>,
        members: Vec<MemberSummary>,
    },
    EnumConvert {
        enum_name: String,
        inner: Box<PlanSummary>,
    },
    Optional {
        inner: Box<PlanSummary>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberSummary {
    pub member: String,
    pub plan: PlanSummary,
}

impl PlanSummary {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            PlanSummary::Terminal {
                column,
                name,
                runtime,
                target,
                policy,
                checked,
            } => {
                write!(f, "{pad}read col {column} '{name}' ({runtime} -> {target}, {policy}")?;
                if *checked {
                    f.write_str(", checked")?;
                }
                writeln!(f, ")")
            }
            PlanSummary::Optional { inner } => {
                writeln!(f, "{pad}optional")?;
                inner.fmt_indent(f, depth + 1)
            }
            PlanSummary::EnumConvert { enum_name, inner } => {
                writeln!(f, "{pad}enum {enum_name}")?;
                inner.fmt_indent(f, depth + 1)
            }
            PlanSummary::Construct {
                type_name,
                path,
                sink,
                args,
                members,
            } => {
                write!(f, "{pad}construct {type_name} via {path}")?;
                if *sink {
                    f.write_str(" [sink]")?;
                }
                writeln!(f)?;
                for arg in args {
                    arg.fmt_indent(f, depth + 1)?;
                }
                for member in members {
                    writeln!(f, "{pad}  set {}", member.member)?;
                    member.plan.fmt_indent(f, depth + 2)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}
