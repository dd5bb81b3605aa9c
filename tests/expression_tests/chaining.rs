use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cortex_expressions::eval::ExecutionContext;
use cortex_expressions::operator::{Api, ApiOperator, Arity, ParsedCommand, SandboxModules};
use cortex_expressions::{ExpressionEngine, FaultResult, OperatorRegistry, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Appends its argument to the instance and records every instance seen.
struct Append {
    seen: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl ApiOperator for Append {
    fn name(&self) -> &'static str {
        "$append"
    }

    fn api(&self) -> Api {
        let seen = self.seen.clone();
        Api::builder()
            .sync_command("push", Arity::Fixed(1), move |_, instance, args| {
                seen.lock().unwrap().push(instance.clone());
                let mut items = instance.as_array().cloned().unwrap_or_default();
                items.push(args[0].clone());
                Ok(Value::Array(items))
            })
            .build()
    }

    fn multiple_commands(&self) -> bool {
        true
    }

    fn chain_commands(&self) -> bool {
        true
    }

    async fn initialize_instance(
        &self,
        _ec: &ExecutionContext,
        input: Value,
        _commands: &[ParsedCommand],
    ) -> FaultResult<Value> {
        Ok(match input {
            Value::Undefined => Value::Array(vec![]),
            other => other,
        })
    }
}

fn engine(seen: Arc<Mutex<Vec<Value>>>) -> ExpressionEngine {
    let mut operators = OperatorRegistry::with_modules(Arc::new(SandboxModules::new()));
    operators.register(Arc::new(Append { seen }));
    ExpressionEngine::new().with_operators(operators)
}

#[tokio::test]
async fn test_each_command_receives_previous_result() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let engine = engine(seen.clone());
    let value = engine
        .evaluate_literal(
            &json!({"$append": [{"push": ["a"]}, {"push": ["b"]}]}),
            Value::Null,
        )
        .await
        .unwrap();

    assert_eq!(value.to_json(), json!(["a", "b"]));
    let seen: Vec<serde_json::Value> = seen.lock().unwrap().iter().map(Value::to_json).collect();
    assert_eq!(seen, vec![json!([]), json!(["a"])]);
}

#[tokio::test]
async fn test_params_see_current_instance() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let engine = engine(seen);
    let value = engine
        .evaluate_literal(
            &json!({"$append": [[1], {"push": ["$$instance"]}, {"push": ["$$instance.0"]}]}),
            Value::Null,
        )
        .await
        .unwrap();
    assert_eq!(value.to_json(), json!([1, [1], 1]));
}

#[test]
fn test_instance_is_unknown_outside_chains() {
    let engine = ExpressionEngine::new();
    let err = engine
        .parse(&json!({"$echo": ["$$instance"]}))
        .unwrap_err();
    assert_eq!(err.code, cortex_expressions::NOT_FOUND_USER_VARIABLE);
}

#[tokio::test]
async fn test_moment_chain_with_instance() {
    let engine = ExpressionEngine::new();
    let value = engine
        .evaluate_literal(
            &json!({"$moment": ["2020-01-31", {"add": [1, "month"]}, {"isSame": ["$$instance", "day"]}]}),
            Value::Null,
        )
        .await
        .unwrap();
    assert_eq!(value, Value::Boolean(true));
}
