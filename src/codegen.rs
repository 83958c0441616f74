//! Code generator
//!
//! Lowers a plan tree into a compiled per-row function by closure
//! composition. Each node becomes a step closure; construct nodes evaluate
//! their children left-to-right, invoke the path, then apply member
//! assignments in order.
//!
//! Jump-if-null reads resolve at compile time to the innermost enclosing
//! recovery sink: a construct whose result slot is optional. At runtime the
//! jump is an internal control value that the sink converts into the null
//! representation, skipping the remaining siblings of that construct. A
//! jump with no enclosing sink fails compilation.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::plan::{ConstructPlan, EnumConvertPlan, Plan, TerminalRead};
use crate::typeinfo::path::NullPolicy;
use crate::value::{PathArgs, Row, RowError, Value};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("jump-on-null at column {column} ('{name}') has no enclosing recovery sink")]
    UnrecoverableJump { column: u16, name: String },
}

/// Outcome of one lowered step: a value, or a jump travelling to the
/// nearest enclosing recovery sink.
pub(crate) enum Eval {
    Value(Value),
    Jump,
}

pub(crate) type Step = Box<dyn Fn(&dyn Row) -> Result<Eval, RowError> + Send + Sync>;

/// Cursor configuration the compiled parser benefits from; the outer layer
/// forwards this to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionHint {
    /// Terminal reads occur in strictly increasing column order, so a
    /// sequential-access cursor suffices.
    pub sequential_access: bool,
    /// One row maps to one instance; a single-result cursor suffices.
    pub single_result: bool,
    pub columns_used: u16,
}

/// A compiled parser plus the plan it was lowered from.
pub struct CompiledParser {
    pub(crate) step: Step,
    pub hint: ExecutionHint,
    pub plan: Arc<Plan>,
}

impl CompiledParser {
    /// Run the parser against the cursor's current row.
    pub(crate) fn parse_value(&self, row: &dyn Row) -> Result<Value, RowError> {
        match (self.step)(row)? {
            Eval::Value(value) => Ok(value),
            // Compilation verified every jump has an enclosing sink.
            Eval::Jump => Err(RowError::ShapeMismatch(
                "recovery jump escaped the plan root".into(),
            )),
        }
    }
}

/// Lower a plan into a compiled parser.
pub fn compile(plan: Plan) -> Result<CompiledParser, CompileError> {
    let step = lower(&plan, false)?;
    let hint = derive_hint(&plan);
    debug!(?hint, "compiled parser");
    Ok(CompiledParser {
        step,
        hint,
        plan: Arc::new(plan),
    })
}

fn lower(plan: &Plan, has_sink: bool) -> Result<Step, CompileError> {
    match plan {
        Plan::Terminal(read) => lower_terminal(read, has_sink),
        Plan::NullableWrap { inner } => lower(inner, has_sink),
        Plan::EnumConvert(convert) => lower_enum(convert, has_sink),
        Plan::Construct(construct) => lower_construct(construct, has_sink),
    }
}

fn lower_terminal(read: &TerminalRead, has_sink: bool) -> Result<Step, CompileError> {
    if matches!(read.policy, NullPolicy::JumpIfNull) && !has_sink {
        return Err(CompileError::UnrecoverableJump {
            column: read.column,
            name: read.column_name.clone(),
        });
    }

    let read = read.clone();
    Ok(Box::new(move |row: &dyn Row| {
        let value = row
            .value(read.column)
            .ok_or(RowError::MissingColumn(read.column))?;
        if read.check_null && value.is_null() {
            return match &read.policy {
                NullPolicy::Nullable => Ok(Eval::Value(Value::Null)),
                NullPolicy::NotNull => Err(RowError::NullAssignment {
                    position: read.column,
                    name: read.column_name.clone(),
                }),
                NullPolicy::JumpIfNull => Ok(Eval::Jump),
                NullPolicy::Custom(handler) => Ok(Eval::Value(handler())),
            };
        }
        read.convert.apply(value, read.column).map(Eval::Value)
    }))
}

fn lower_enum(convert: &EnumConvertPlan, has_sink: bool) -> Result<Step, CompileError> {
    let inner = lower(&convert.inner, has_sink)?;
    let enum_name = convert.enum_name.clone();
    let to_variant = convert.convert.clone();
    Ok(Box::new(move |row: &dyn Row| {
        let value = match inner(row)? {
            Eval::Jump => return Ok(Eval::Jump),
            Eval::Value(Value::Null) => return Ok(Eval::Value(Value::Null)),
            Eval::Value(value) => value,
        };
        let discriminant = integral_value(&value).ok_or_else(|| RowError::ShapeMismatch(
            format!("enum {enum_name} read a non-integral {}", value.type_label()),
        ))?;
        to_variant(discriminant)
            .map(Eval::Value)
            .ok_or_else(|| RowError::EnumOutOfRange {
                enum_name: enum_name.clone(),
                value: discriminant,
            })
    }))
}

fn integral_value(value: &Value) -> Option<i64> {
    match value {
        Value::I16(v) => Some(i64::from(*v)),
        Value::I32(v) => Some(i64::from(*v)),
        Value::I64(v) => Some(*v),
        _ => None,
    }
}

fn lower_construct(construct: &ConstructPlan, has_sink: bool) -> Result<Step, CompileError> {
    // This construct absorbs descendant jumps when its own result slot is
    // optional; otherwise jumps keep travelling outward.
    let is_sink = construct.nullable_result;
    let inner_sink = has_sink || is_sink;

    let args = construct
        .args
        .iter()
        .map(|arg| lower(arg, inner_sink))
        .collect::<Result<Vec<_>, _>>()?;
    let members = construct
        .members
        .iter()
        .map(|(setter, plan)| lower(plan, inner_sink).map(|step| (setter.assign.clone(), step)))
        .collect::<Result<Vec<_>, _>>()?;
    let invoke = construct.path.invoke.clone();

    Ok(Box::new(move |row: &dyn Row| {
        let mut values = Vec::with_capacity(args.len());
        for step in &args {
            match step(row)? {
                Eval::Value(value) => values.push(value),
                Eval::Jump if is_sink => return Ok(Eval::Value(Value::Null)),
                Eval::Jump => return Ok(Eval::Jump),
            }
        }
        let mut value = invoke(PathArgs::new(values))?;
        for (assign, step) in &members {
            match step(row)? {
                Eval::Value(member_value) => assign(&mut value, member_value)?,
                Eval::Jump if is_sink => return Ok(Eval::Value(Value::Null)),
                Eval::Jump => return Ok(Eval::Jump),
            }
        }
        Ok(Eval::Value(value))
    }))
}

fn derive_hint(plan: &Plan) -> ExecutionHint {
    let columns = plan.used_columns();
    let sequential_access = columns.windows(2).all(|pair| pair[0] < pair[1]);
    ExecutionHint {
        sequential_access,
        single_result: true,
        columns_used: columns.len() as u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo::path::{Path, PathKind};
    use crate::typeinfo::TypeRef;
    use crate::value::{BasicType, ConvertOp, VecRow};

    fn terminal(column: u16, policy: NullPolicy) -> Plan {
        Plan::Terminal(TerminalRead {
            column,
            column_name: format!("c{column}"),
            runtime_type: BasicType::I32,
            target: BasicType::I32,
            convert: ConvertOp::Identity,
            policy,
            check_null: true,
        })
    }

    fn sum_path() -> Arc<Path> {
        Arc::new(Path {
            kind: PathKind::Constructor,
            params: vec![],
            produces: TypeRef::Basic(BasicType::I32),
            can_complete_with_members: true,
            manual: false,
            invoke: Arc::new(|mut args: PathArgs| {
                let a: i32 = args.take()?;
                let b: i32 = args.take()?;
                Ok(Value::I32(a + b))
            }),
        })
    }

    fn construct(args: Vec<Plan>, nullable_result: bool) -> Plan {
        Plan::Construct(ConstructPlan {
            type_name: "Sum".to_string(),
            path: sum_path(),
            args,
            members: vec![],
            policy: NullPolicy::NotNull,
            nullable_result,
        })
    }

    #[test]
    fn test_root_jump_without_sink_fails_compilation() {
        let plan = construct(
            vec![
                terminal(0, NullPolicy::JumpIfNull),
                terminal(1, NullPolicy::NotNull),
            ],
            false,
        );
        assert!(matches!(
            compile(plan),
            Err(CompileError::UnrecoverableJump { column: 0, .. })
        ));
    }

    #[test]
    fn test_sink_absorbs_jump_and_yields_null() {
        let plan = construct(
            vec![
                terminal(0, NullPolicy::JumpIfNull),
                terminal(1, NullPolicy::NotNull),
            ],
            true,
        );
        let parser = compile(plan).unwrap();

        let row = VecRow::new(vec![Value::Null, Value::I32(5)]);
        let value = parser.parse_value(&row).unwrap();
        assert!(value.is_null(), "sink should null the whole construct");

        let row = VecRow::new(vec![Value::I32(2), Value::I32(5)]);
        assert!(matches!(parser.parse_value(&row), Ok(Value::I32(7))));
    }

    #[test]
    fn test_not_null_policy_raises_on_null() {
        let plan = construct(
            vec![
                terminal(0, NullPolicy::NotNull),
                terminal(1, NullPolicy::NotNull),
            ],
            false,
        );
        let parser = compile(plan).unwrap();
        let row = VecRow::new(vec![Value::Null, Value::I32(5)]);
        assert!(matches!(
            parser.parse_value(&row),
            Err(RowError::NullAssignment { position: 0, .. })
        ));
    }

    #[test]
    fn test_custom_policy_substitutes_value() {
        let custom = NullPolicy::Custom(Arc::new(|| Value::I32(-1)));
        let plan = construct(
            vec![terminal(0, custom), terminal(1, NullPolicy::NotNull)],
            false,
        );
        let parser = compile(plan).unwrap();
        let row = VecRow::new(vec![Value::Null, Value::I32(5)]);
        assert!(matches!(parser.parse_value(&row), Ok(Value::I32(4))));
    }

    #[test]
    fn test_hint_detects_sequential_access() {
        let ordered = construct(
            vec![
                terminal(0, NullPolicy::NotNull),
                terminal(1, NullPolicy::NotNull),
            ],
            false,
        );
        assert!(compile(ordered).unwrap().hint.sequential_access);

        let reversed = construct(
            vec![
                terminal(1, NullPolicy::NotNull),
                terminal(0, NullPolicy::NotNull),
            ],
            false,
        );
        let hint = compile(reversed).unwrap().hint;
        assert!(!hint.sequential_access);
        assert_eq!(hint.columns_used, 2);
    }
}
