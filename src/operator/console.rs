use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn};

use super::{ApiOperator, Arity, SandboxModule};
use crate::value::Value;

pub const MODULE: &str = "console";

fn render(args: &[Value]) -> String {
    let items = match args {
        [Value::Array(items)] => items.as_slice(),
        other => other,
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            Value::Object(_) | Value::Array(_) => item.to_json().to_string(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `console` sandbox module; every function logs under `cortex::console`.
pub fn module() -> SandboxModule {
    SandboxModule::builder(MODULE)
        .function("log", Arity::Variadic, |call, args| async move {
            info!(target: "cortex::console", path = %call.path, "{}", render(&args));
            Ok(Value::Undefined)
        })
        .function("info", Arity::Variadic, |call, args| async move {
            info!(target: "cortex::console", path = %call.path, "{}", render(&args));
            Ok(Value::Undefined)
        })
        .function("warn", Arity::Variadic, |call, args| async move {
            warn!(target: "cortex::console", path = %call.path, "{}", render(&args));
            Ok(Value::Undefined)
        })
        .function("error", Arity::Variadic, |call, args| async move {
            error!(target: "cortex::console", path = %call.path, "{}", render(&args));
            Ok(Value::Undefined)
        })
        .function("debug", Arity::Variadic, |call, args| async move {
            debug!(target: "cortex::console", path = %call.path, "{}", render(&args));
            Ok(Value::Undefined)
        })
        .function("trace", Arity::Variadic, |call, args| async move {
            trace!(target: "cortex::console", path = %call.path, "{}", render(&args));
            Ok(Value::Undefined)
        })
        .build()
}

/// `{"$console": [{"log": ["a", 1]}, {"warn": ["b"]}]}`
pub struct ConsoleOperator;

#[async_trait]
impl ApiOperator for ConsoleOperator {
    fn name(&self) -> &'static str {
        "$console"
    }

    fn sandbox_module(&self) -> Option<&'static str> {
        Some(MODULE)
    }

    fn sandbox_params_as_array(&self) -> bool {
        true
    }

    fn multiple_commands(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{ExecutionContext, ExpressionRoot};
    use crate::operator::OperatorRegistry;
    use serde_json::json;

    #[test]
    fn test_render() {
        let args = vec![Value::Array(vec![
            Value::from("count"),
            Value::Number(2.0),
            Value::from(json!({"a": 1})),
        ])];
        assert_eq!(render(&args), r#"count 2 {"a":1}"#);
    }

    #[tokio::test]
    async fn test_console_multiple_commands() {
        let registry = OperatorRegistry::with_defaults();
        let root = ExpressionRoot::parse(
            &json!({"$console": [{"log": ["hello", "$$ROOT.n"]}, {"warn": "careful"}, "debug"]}),
            &registry,
        )
        .unwrap();
        let ec = ExecutionContext::for_document(Value::from(json!({"n": 1})));
        assert_eq!(root.evaluate(&ec).await.unwrap(), Value::Undefined);
    }
}
