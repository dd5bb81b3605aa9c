use crate::eval::ExpressionKind;
use crate::value::Value;

/// `{"$literal": x}` yields `x` untouched: no variables, no operators.
pub const NAME: &str = "$literal";

pub fn parse(value: &serde_json::Value) -> ExpressionKind {
    ExpressionKind::Literal(Value::from(value.clone()))
}

#[cfg(test)]
mod tests {
    use crate::eval::{ExecutionContext, ExpressionRoot};
    use crate::operator::OperatorRegistry;
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_literal_is_not_interpreted() {
        let literal = json!({"$literal": {"$echo": ["$$ROOT"], "text": "$$NOW"}});
        let root = ExpressionRoot::parse(&literal, &OperatorRegistry::with_defaults()).unwrap();
        assert!(root.expression().is_literal());
        assert!(!root.is_registered("$$NOW"));

        let value = root
            .evaluate(&ExecutionContext::for_document(Value::Null))
            .await
            .unwrap();
        assert_eq!(value.to_json(), json!({"$echo": ["$$ROOT"], "text": "$$NOW"}));
    }

    #[tokio::test]
    async fn test_literal_inside_structure() {
        let literal = json!({"keep": {"$literal": "$$ROOT"}, "doc": "$$ROOT.a"});
        let root = ExpressionRoot::parse(&literal, &OperatorRegistry::with_defaults()).unwrap();
        let value = root
            .evaluate(&ExecutionContext::for_document(Value::from(json!({"a": 1}))))
            .await
            .unwrap();
        assert_eq!(value.to_json(), json!({"keep": "$$ROOT", "doc": 1}));
    }
}
