use async_trait::async_trait;

use super::{ApiOperator, ParsedCommand};
use crate::error::FaultResult;
use crate::eval::ExecutionContext;
use crate::value::Value;

/// `{"$echo": [input]}` evaluates to its input.
pub struct EchoOperator;

#[async_trait]
impl ApiOperator for EchoOperator {
    fn name(&self) -> &'static str {
        "$echo"
    }

    async fn initialize_instance(
        &self,
        _ec: &ExecutionContext,
        input: Value,
        _commands: &[ParsedCommand],
    ) -> FaultResult<Value> {
        Ok(input)
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

#[cfg(test)]
mod tests {
    use crate::error::INVALID_UNKNOWN_COMMAND;
    use crate::eval::{ExecutionContext, ExpressionRoot};
    use crate::operator::OperatorRegistry;
    use crate::value::Value;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_returns_input() {
        let registry = OperatorRegistry::with_defaults();
        let root = ExpressionRoot::parse(&json!({"$echo": ["hello"]}), &registry).unwrap();
        let value = root
            .evaluate(&ExecutionContext::for_document(Value::Null))
            .await
            .unwrap();
        assert_eq!(value, Value::from("hello"));
    }

    #[tokio::test]
    async fn test_echo_scalar_and_nested() {
        let registry = OperatorRegistry::with_defaults();
        let root = ExpressionRoot::parse(
            &json!({"$echo": {"$echo": ["$$ROOT.a"]}}),
            &registry,
        )
        .unwrap();
        let ec = ExecutionContext::for_document(Value::from(json!({"a": 7})));
        assert_eq!(root.evaluate(&ec).await.unwrap(), Value::Number(7.0));
    }

    #[test]
    fn test_echo_has_no_commands() {
        let registry = OperatorRegistry::with_defaults();
        let err = ExpressionRoot::parse(&json!({"$echo": ["a", "upper"]}), &registry)
            .unwrap_err();
        assert_eq!(err.code, INVALID_UNKNOWN_COMMAND);
    }
}
