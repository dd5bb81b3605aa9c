use async_trait::async_trait;
use tracing::debug;

use super::{Api, ApiCall, ApiOperator, Arity, ParsedCommand};
use crate::cursor::CursorRef;
use crate::error::{Fault, FaultResult};
use crate::eval::{ExecutionContext, CURSOR_VARIABLE};
use crate::value::Value;

fn cursor_of(call: &ApiCall, instance: &Value) -> FaultResult<CursorRef> {
    match instance {
        Value::Cursor(cursor) => Ok(cursor.clone()),
        other => Err(call.invalid(format!("expects a cursor, got {}", other.type_name()))),
    }
}

fn limit_arg(call: &ApiCall, value: &Value) -> FaultResult<Option<usize>> {
    match value {
        v if v.is_nullish() => Ok(None),
        Value::Number(n) if *n >= 0.0 && n.is_finite() => Ok(Some(*n as usize)),
        _ => Err(call.invalid("limit must be a non-negative number")),
    }
}

/// Commands over a cursor: the input (a cursor or an array) or, without
/// input, the pass cursor bound to `$$CURSOR`.
///
/// ```json
/// {"$cursor": [[1, 2, 3], "next", {"toArray": [1]}]}
/// ```
pub struct CursorOperator;

impl CursorOperator {
    fn api_table() -> Api {
        Api::builder()
            .command("hasNext", Arity::Fixed(0), |call, instance, _| async move {
                Ok(Value::Boolean(cursor_of(&call, &instance)?.has_next().await?))
            })
            .command("next", Arity::Fixed(0), |call, instance, _| async move {
                Ok(cursor_of(&call, &instance)?.next().await?.unwrap_or_default())
            })
            .command("toArray", Arity::Fixed(1), |call, instance, args| async move {
                let limit = limit_arg(&call, &args[0])?;
                Ok(Value::Array(cursor_of(&call, &instance)?.to_array(limit).await?))
            })
            .command("close", Arity::Fixed(0), |call, instance, _| async move {
                cursor_of(&call, &instance)?.close().await?;
                Ok(Value::Undefined)
            })
            .command("isClosed", Arity::Fixed(0), |call, instance, _| async move {
                Ok(Value::Boolean(cursor_of(&call, &instance)?.is_closed().await))
            })
            .command("passthru", Arity::Fixed(1), |call, instance, args| async move {
                let replay = match &args[0] {
                    v if v.is_nullish() => true,
                    v => v.is_truthy(),
                };
                cursor_of(&call, &instance)?.passthru(replay).await
            })
            .command("push", Arity::Variadic, |call, instance, args| async move {
                let items = match args.into_iter().next() {
                    Some(Value::Array(items)) => items,
                    _ => vec![],
                };
                cursor_of(&call, &instance)?.push(items).await?;
                Ok(Value::Undefined)
            })
            .build()
    }
}

#[async_trait]
impl ApiOperator for CursorOperator {
    fn name(&self) -> &'static str {
        "$cursor"
    }

    fn api(&self) -> Api {
        Self::api_table()
    }

    fn multiple_commands(&self) -> bool {
        true
    }

    async fn initialize_instance(
        &self,
        ec: &ExecutionContext,
        input: Value,
        _commands: &[ParsedCommand],
    ) -> FaultResult<Value> {
        let cursor = match input {
            Value::Cursor(cursor) => cursor,
            Value::Array(items) => {
                debug!("wrapping {} items in a cursor", items.len());
                let cursor = CursorRef::from_values(items, &ec.config().cursor);
                if let Some(operation) = ec.root().operation() {
                    operation.attach_cursor(cursor.clone());
                }
                cursor
            }
            Value::Undefined => match ec.get_variable(CURSOR_VARIABLE) {
                Some(Value::Cursor(cursor)) => cursor,
                _ => {
                    return Err(Fault::invalid_argument(format!(
                        "$cursor: no input and no {} bound",
                        CURSOR_VARIABLE
                    )))
                }
            },
            other => {
                return Err(Fault::invalid_argument(format!(
                    "$cursor: expects a cursor or an array, got {}",
                    other.type_name()
                )))
            }
        };
        Ok(Value::Cursor(cursor))
    }

    async fn finalize_instance(
        &self,
        _ec: &ExecutionContext,
        instance: Value,
        last: Value,
        commands: &[ParsedCommand],
    ) -> FaultResult<Value> {
        Ok(if commands.is_empty() { instance } else { last })
    }
}
