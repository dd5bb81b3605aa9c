use std::collections::{BTreeSet, HashMap, HashSet};

use async_recursion::async_recursion;

use super::context::ExecutionContext;
use super::system_variable::{SystemVariable, SystemVariableKind};
use crate::error::{Fault, FaultResult};
use crate::operator::let_op::{self, LetNode};
use crate::operator::{literal, ApiNode, OperatorRegistry};
use crate::value::{read_object, Value};

/// Sentinel marking a variable reference.
pub const VARIABLE_SIGIL: &str = "$$";
/// Operator keys start with this.
pub const OPERATOR_SIGIL: char = '$';

pub fn join_path(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", parent, segment)
    }
}

/// Splits `$$name.rest` into `(name, rest)`.
pub fn split_variable(literal: &str) -> Option<(&str, &str)> {
    let body = literal.strip_prefix(VARIABLE_SIGIL)?;
    Some(match body.split_once('.') {
        Some((name, rest)) => (name, rest),
        None => (body, ""),
    })
}

/// Parse-time bookkeeping: variables registered on the expression root and
/// the stack of user-variable scopes opened by enclosing operators.
#[derive(Debug, Default)]
pub struct ParseContext {
    registered: BTreeSet<String>,
    scopes: Vec<HashSet<String>>,
}

impl ParseContext {
    pub fn register_variable(&mut self, name: &str) {
        self.registered.insert(name.to_string());
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.contains(name)
    }

    pub fn push_scope<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.scopes.push(names.into_iter().collect());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn is_user_variable(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(name))
    }
}

/// Single-pass parser from JSON literals to expression trees.
pub struct Parser<'a> {
    registry: &'a OperatorRegistry,
    pub ctx: ParseContext,
}

impl<'a> Parser<'a> {
    pub fn new(registry: &'a OperatorRegistry) -> Self {
        Self {
            registry,
            ctx: ParseContext::default(),
        }
    }

    pub fn registry(&self) -> &'a OperatorRegistry {
        self.registry
    }

    /// Parses `value` with the user variables `names` in scope.
    pub fn parse_scoped<I: IntoIterator<Item = String>>(
        &mut self,
        names: I,
        value: &serde_json::Value,
        path: &str,
    ) -> FaultResult<Expression> {
        self.ctx.push_scope(names);
        let parsed = self.parse(value, path);
        self.ctx.pop_scope();
        parsed
    }

    pub fn parse(&mut self, value: &serde_json::Value, path: &str) -> FaultResult<Expression> {
        let kind = match value {
            serde_json::Value::String(s) if s.starts_with(VARIABLE_SIGIL) => {
                self.parse_variable(s, path)?
            }
            serde_json::Value::Array(items) => {
                let items = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.parse(item, &join_path(path, &i.to_string())))
                    .collect::<FaultResult<Vec<_>>>()?;
                if items.iter().all(Expression::is_literal) {
                    ExpressionKind::Literal(Value::from(value.clone()))
                } else {
                    ExpressionKind::Array(items)
                }
            }
            serde_json::Value::Object(map) => {
                let operators: Vec<&String> = map
                    .keys()
                    .filter(|k| k.starts_with(OPERATOR_SIGIL))
                    .collect();
                match operators.as_slice() {
                    [] => {
                        let entries = map
                            .iter()
                            .map(|(k, v)| Ok((k.clone(), self.parse(v, &join_path(path, k))?)))
                            .collect::<FaultResult<Vec<_>>>()?;
                        if entries.iter().all(|(_, e)| e.is_literal()) {
                            ExpressionKind::Literal(Value::from(value.clone()))
                        } else {
                            ExpressionKind::Object(entries)
                        }
                    }
                    [name] if map.len() == 1 => {
                        return self.parse_operator(name, &map[name.as_str()], path);
                    }
                    _ => {
                        return Err(Fault::invalid_argument(
                            "An operator object must have exactly one key",
                        )
                        .with_path(path))
                    }
                }
            }
            other => ExpressionKind::Literal(Value::from(other.clone())),
        };
        Ok(Expression {
            path: path.to_string(),
            kind,
        })
    }

    fn parse_variable(&mut self, literal: &str, path: &str) -> FaultResult<ExpressionKind> {
        let (name, rest) = split_variable(literal).unwrap_or_default();
        if let Some(kind) = SystemVariableKind::from_name(name) {
            return SystemVariable::parse(kind, literal, &mut self.ctx, path)
                .map(ExpressionKind::SystemVariable);
        }
        if self.ctx.is_user_variable(name) {
            return Ok(ExpressionKind::UserVariable {
                name: name.to_string(),
                path: rest.to_string(),
            });
        }
        Err(Fault::user_variable_not_found(name).with_path(path))
    }

    fn parse_operator(
        &mut self,
        name: &str,
        value: &serde_json::Value,
        path: &str,
    ) -> FaultResult<Expression> {
        let path = join_path(path, name);
        let kind = match name {
            literal::NAME => literal::parse(value),
            let_op::NAME => ExpressionKind::Let(LetNode::parse(self, value, &path)?),
            _ => {
                let operator = self
                    .registry
                    .get(name)
                    .ok_or_else(|| Fault::unknown_operator(name).with_path(&path))?;
                ExpressionKind::Api(ApiNode::parse(operator, self, value, &path)?)
            }
        };
        Ok(Expression { path, kind })
    }
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Literal(Value),
    Array(Vec<Expression>),
    Object(Vec<(String, Expression)>),
    SystemVariable(SystemVariable),
    UserVariable { name: String, path: String },
    Api(ApiNode),
    Let(LetNode),
}

/// A parsed node. Immutable after parse; evaluated once per pass.
#[derive(Debug, Clone)]
pub struct Expression {
    /// Dotted path of this node in the source literal.
    pub path: String,
    pub kind: ExpressionKind,
}

impl Expression {
    pub fn literal(value: Value, path: &str) -> Self {
        Self {
            path: path.to_string(),
            kind: ExpressionKind::Literal(value),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ExpressionKind::Literal(_))
    }

    #[async_recursion]
    pub async fn evaluate(&self, ec: &ExecutionContext) -> FaultResult<Value> {
        match &self.kind {
            ExpressionKind::Literal(value) => Ok(value.clone()),
            ExpressionKind::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(item.evaluate(ec).await?);
                }
                Ok(Value::Array(values))
            }
            ExpressionKind::Object(entries) => {
                let mut map = HashMap::with_capacity(entries.len());
                for (key, item) in entries {
                    map.insert(key.clone(), item.evaluate(ec).await?);
                }
                Ok(Value::Object(map))
            }
            ExpressionKind::SystemVariable(variable) => variable
                .evaluate(ec)
                .await
                .map_err(|e| e.or_path(&self.path)),
            ExpressionKind::UserVariable { name, path } => Ok(ec
                .get_variable(name)
                .map(|value| read_object(&value, path))
                .unwrap_or_default()),
            ExpressionKind::Api(node) => node.evaluate(ec).await,
            ExpressionKind::Let(node) => node.evaluate(ec).await,
        }
    }
}

/// A fully parsed expression together with the variables registered on its
/// root during parse.
#[derive(Debug, Clone)]
pub struct ExpressionRoot {
    expression: Expression,
    registered: BTreeSet<String>,
}

impl ExpressionRoot {
    pub fn parse(literal: &serde_json::Value, registry: &OperatorRegistry) -> FaultResult<Self> {
        let mut parser = Parser::new(registry);
        let expression = parser.parse(literal, "")?;
        Ok(Self {
            expression,
            registered: parser.ctx.registered,
        })
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn registered_variables(&self) -> impl Iterator<Item = &str> {
        self.registered.iter().map(String::as_str)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.contains(name)
    }

    pub async fn evaluate(&self, ec: &ExecutionContext) -> FaultResult<Value> {
        self.expression.evaluate(ec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{INVALID_QUERY, INVALID_UNKNOWN_OPERATOR, NOT_FOUND_USER_VARIABLE};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(literal: serde_json::Value) -> FaultResult<ExpressionRoot> {
        ExpressionRoot::parse(&literal, &OperatorRegistry::with_defaults())
    }

    async fn eval(literal: serde_json::Value) -> FaultResult<Value> {
        parse(literal)?
            .evaluate(&ExecutionContext::for_document(Value::Null))
            .await
    }

    #[test]
    fn test_split_variable() {
        assert_eq!(split_variable("$$ROOT.a.b"), Some(("ROOT", "a.b")));
        assert_eq!(split_variable("$$NOW"), Some(("NOW", "")));
        assert_eq!(split_variable("$NOW"), None);
    }

    #[test]
    fn test_plain_literals_fold() {
        let root = parse(json!({"a": [1, 2, {"b": "c"}], "d": "$e"})).unwrap();
        assert!(root.expression().is_literal());
    }

    #[tokio::test]
    async fn test_variables_inside_structures() {
        let root = parse(json!({"doc": "$$ROOT.name", "items": [1, "$$ROOT.n"]})).unwrap();
        let ec = ExecutionContext::for_document(Value::from(json!({"name": "x", "n": 2})));
        let value = root.evaluate(&ec).await.unwrap();
        assert_eq!(value.to_json(), json!({"doc": "x", "items": [1, 2]}));
    }

    #[test]
    fn test_unregistered_user_variable() {
        let err = parse(json!({"a": ["$$nope.x"]})).unwrap_err();
        assert_eq!(err.code, NOT_FOUND_USER_VARIABLE);
        assert_eq!(err.path.as_deref(), Some("a.0"));
    }

    #[test]
    fn test_mixed_operator_keys() {
        let err = parse(json!({"$echo": ["a"], "$http": []})).unwrap_err();
        assert_eq!(err.code, INVALID_QUERY);

        let err = parse(json!({"$echo": ["a"], "plain": 1})).unwrap_err();
        assert_eq!(err.code, INVALID_QUERY);
    }

    #[test]
    fn test_unknown_operator() {
        let err = parse(json!({"x": {"$nope": []}})).unwrap_err();
        assert_eq!(err.code, INVALID_UNKNOWN_OPERATOR);
        assert_eq!(err.path.as_deref(), Some("x.$nope"));
    }

    #[test]
    fn test_now_registers_on_root() {
        let root = parse(json!(["$$NOW", "$$ROOT"])).unwrap();
        assert_eq!(root.registered_variables().collect::<Vec<_>>(), vec!["$$NOW"]);
    }

    #[tokio::test]
    async fn test_random_is_fresh_each_time() {
        let value = eval(json!(["$$RANDOM", "$$RANDOM"])).await.unwrap();
        let items = value.as_array().unwrap();
        let (a, b) = (items[0].as_f64().unwrap(), items[1].as_f64().unwrap());
        assert!((0.0..1.0).contains(&a));
        assert!((0.0..1.0).contains(&b));
        assert_ne!(a, b);
    }
}
