use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{Fault, FaultResult};
use crate::runtime::RuntimeOperation;
use crate::value::{self, Value};

/// Host-bound variable holding the cursor an expression reads from.
pub const CURSOR_VARIABLE: &str = "$$CURSOR";
/// Host-bound variable holding the cursor an expression writes to.
pub const OUTPUT_VARIABLE: &str = "$$OUTPUT";

/// Caller identity and request data (ac).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessContext {
    #[serde(default)]
    pub org: serde_json::Value,
    #[serde(default)]
    pub principal: serde_json::Value,
    #[serde(default, alias = "req")]
    pub request: serde_json::Value,
    #[serde(default)]
    pub script: serde_json::Value,
    #[serde(default)]
    pub locale: Option<String>,
}

impl AccessContext {
    pub fn get_locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }
}

/// State shared by every context of one evaluation pass (ec.root).
pub struct PassRoot {
    document: Value,
    memo: DashMap<String, Value>,
    variables: DashMap<String, Value>,
    operation: Option<Arc<RuntimeOperation>>,
    config: Arc<EngineConfig>,
}

impl PassRoot {
    pub fn new(document: Value) -> Self {
        Self {
            document,
            memo: DashMap::new(),
            variables: DashMap::new(),
            operation: None,
            config: Arc::new(EngineConfig::default()),
        }
    }

    pub fn with_config(mut self, config: Arc<EngineConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn with_operation(mut self, operation: Arc<RuntimeOperation>) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_variables<I, K>(self, variables: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (name, value) in variables {
            self.variables.insert(name.into(), value);
        }
        self
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn operation(&self) -> Option<&Arc<RuntimeOperation>> {
        self.operation.as_ref()
    }

    /// Returns the memoised value for `key`, computing it on first use.
    pub fn memoize<F: FnOnce() -> Value>(&self, key: &str, init: F) -> Value {
        self.memo.entry(key.to_string()).or_insert_with(init).clone()
    }
}

#[derive(Debug)]
struct Scope {
    variables: HashMap<String, Value>,
    parent: Option<Arc<Scope>>,
}

/// Execution context (ec). Cheap to clone; nested scopes share the pass
/// root.
#[derive(Clone)]
pub struct ExecutionContext {
    root: Arc<PassRoot>,
    ac: Arc<AccessContext>,
    subject: Value,
    scope: Option<Arc<Scope>>,
}

impl ExecutionContext {
    pub fn new(root: PassRoot, ac: AccessContext) -> Self {
        let subject = root.document.clone();
        Self {
            root: Arc::new(root),
            ac: Arc::new(ac),
            subject,
            scope: None,
        }
    }

    /// Context over `document` with an empty access context.
    pub fn for_document(document: Value) -> Self {
        Self::new(PassRoot::new(document), AccessContext::default())
    }

    pub fn root(&self) -> &PassRoot {
        &self.root
    }

    pub fn ac(&self) -> &AccessContext {
        &self.ac
    }

    pub fn config(&self) -> &EngineConfig {
        &self.root.config
    }

    pub fn subject(&self) -> &Value {
        &self.subject
    }

    pub fn locale(&self) -> String {
        self.ac
            .get_locale()
            .map(str::to_string)
            .unwrap_or_else(|| self.root.config.default_locale.clone())
    }

    /// Child context whose `$$CONTEXT` is `subject`.
    pub fn with_subject(&self, subject: Value) -> Self {
        Self {
            subject,
            ..self.clone()
        }
    }

    pub fn with_variable(&self, name: impl Into<String>, value: Value) -> Self {
        self.with_variables([(name.into(), value)])
    }

    /// Child context with a new lexical scope.
    pub fn with_variables<I>(&self, variables: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Self {
            scope: Some(Arc::new(Scope {
                variables: variables.into_iter().collect(),
                parent: self.scope.clone(),
            })),
            ..self.clone()
        }
    }

    /// Innermost scope first, then host variables on the pass root.
    pub fn get_variable(&self, name: &str) -> Option<Value> {
        let mut scope = self.scope.as_deref();
        while let Some(current) = scope {
            if let Some(value) = current.variables.get(name) {
                return Some(value.clone());
            }
            scope = current.parent.as_deref();
        }
        self.root.variables.get(name).map(|v| v.clone())
    }

    /// Sets a host variable, visible for the rest of the pass.
    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.root.variables.insert(name.into(), value);
    }

    pub fn host_variables(&self) -> Value {
        Value::Object(
            self.root
                .variables
                .iter()
                .filter(|entry| !entry.key().starts_with("$$"))
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        )
    }

    pub fn read_object(&self, object: &Value, path: &str) -> Value {
        value::read_object(object, path)
    }

    pub fn check_cancelled(&self) -> FaultResult<()> {
        match &self.root.operation {
            Some(op) if op.is_cancelled() => Err(op
                .err()
                .unwrap_or_else(|| Fault::aborted("Operation cancelled"))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::OperationRegistry;

    #[test]
    fn test_scope_shadowing() {
        let ec = ExecutionContext::for_document(Value::Null);
        ec.set_variable("x", Value::from(1i64));
        let inner = ec.with_variable("x", Value::from(2i64));
        let innermost = inner.with_variable("y", Value::from(3i64));

        assert_eq!(ec.get_variable("x"), Some(Value::from(1i64)));
        assert_eq!(innermost.get_variable("x"), Some(Value::from(2i64)));
        assert_eq!(innermost.get_variable("y"), Some(Value::from(3i64)));
        assert_eq!(inner.get_variable("y"), None);
    }

    #[test]
    fn test_memoize_once_per_pass() {
        let ec = ExecutionContext::for_document(Value::Null);
        let a = ec.root().memoize("k", || Value::from(1i64));
        let b = ec.root().memoize("k", || Value::from(2i64));
        assert_eq!(a, b);

        let other = ExecutionContext::for_document(Value::Null);
        assert_eq!(
            other.root().memoize("k", || Value::from(2i64)),
            Value::from(2i64)
        );
    }

    #[test]
    fn test_locale_falls_back_to_config() {
        let ec = ExecutionContext::for_document(Value::Null);
        assert_eq!(ec.locale(), "en_US");

        let ac: AccessContext = serde_json::from_str(r#"{"locale": "fr_FR"}"#).unwrap();
        let ec = ExecutionContext::new(PassRoot::new(Value::Null), ac);
        assert_eq!(ec.locale(), "fr_FR");
    }

    #[tokio::test]
    async fn test_check_cancelled() {
        let op = RuntimeOperation::builder("request")
            .registry(Arc::new(OperationRegistry::new()))
            .build();
        op.start().unwrap();
        let ec = ExecutionContext::new(
            PassRoot::new(Value::Null).with_operation(op.clone()),
            AccessContext::default(),
        );
        assert!(ec.check_cancelled().is_ok());
        op.cancel(None).await.unwrap();
        assert!(ec.check_cancelled().unwrap_err().is_aborted());
    }
}
