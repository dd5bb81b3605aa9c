use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture};

use crate::error::{Fault, FaultResult};
use crate::eval::ExecutionContext;
use crate::value::Value;

pub type HandlerFuture = BoxFuture<'static, FaultResult<Value>>;
pub type HandlerFn = Arc<dyn Fn(ApiCall, Value, Vec<Value>) -> HandlerFuture + Send + Sync>;

/// How evaluated parameters bind to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly `n` positional arguments; extras are dropped, missing ones are
    /// `Undefined`.
    Fixed(usize),
    /// A single `Array` argument holding every parameter.
    Variadic,
}

/// Per-invocation data handed to a command handler.
#[derive(Clone)]
pub struct ApiCall {
    pub ec: ExecutionContext,
    pub operator: &'static str,
    pub command: String,
    pub path: String,
}

impl ApiCall {
    /// Argument validation failure pointing at the command.
    pub fn invalid<R: Into<String>>(&self, reason: R) -> Fault {
        Fault::invalid_argument(format!(
            "{}.{}: {}",
            self.operator,
            self.command,
            reason.into()
        ))
        .with_path(&self.path)
    }
}

#[derive(Clone)]
pub struct CommandHandler {
    name: String,
    arity: Arity,
    is_async: bool,
    func: HandlerFn,
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandler")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("is_async", &self.is_async)
            .finish()
    }
}

impl CommandHandler {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn bind(&self, mut params: Vec<Value>) -> Vec<Value> {
        match self.arity {
            Arity::Fixed(n) => {
                params.resize(n, Value::Undefined);
                params
            }
            Arity::Variadic => vec![Value::Array(params)],
        }
    }

    pub async fn invoke(
        &self,
        call: ApiCall,
        instance: Value,
        params: Vec<Value>,
    ) -> FaultResult<Value> {
        let args = self.bind(params);
        (self.func)(call, instance, args).await
    }

    /// Same handler with every parameter collected into one array.
    pub fn variadic(mut self) -> Self {
        self.arity = Arity::Variadic;
        self
    }
}

/// Static command table of one operator.
#[derive(Clone, Default, Debug)]
pub struct Api {
    commands: HashMap<String, CommandHandler>,
}

impl Api {
    pub fn builder() -> ApiBuilder {
        ApiBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&CommandHandler> {
        self.commands.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Adds `other`'s commands; existing entries win.
    pub fn merge(&mut self, other: &Api) {
        for (name, handler) in &other.commands {
            self.commands
                .entry(name.clone())
                .or_insert_with(|| handler.clone());
        }
    }

    pub(crate) fn map_handlers(self, f: impl Fn(CommandHandler) -> CommandHandler) -> Api {
        Api {
            commands: self
                .commands
                .into_iter()
                .map(|(name, handler)| (name, f(handler)))
                .collect(),
        }
    }
}

#[derive(Default)]
pub struct ApiBuilder {
    commands: HashMap<String, CommandHandler>,
}

impl ApiBuilder {
    pub fn command<F, Fut>(mut self, name: &str, arity: Arity, f: F) -> Self
    where
        F: Fn(ApiCall, Value, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FaultResult<Value>> + Send + 'static,
    {
        let func: HandlerFn =
            Arc::new(move |call: ApiCall, instance: Value, args: Vec<Value>| -> HandlerFuture {
                Box::pin(f(call, instance, args))
            });
        self.commands.insert(
            name.to_string(),
            CommandHandler {
                name: name.to_string(),
                arity,
                is_async: true,
                func,
            },
        );
        self
    }

    pub fn sync_command<F>(mut self, name: &str, arity: Arity, f: F) -> Self
    where
        F: Fn(&ApiCall, &Value, &[Value]) -> FaultResult<Value> + Send + Sync + 'static,
    {
        let func: HandlerFn =
            Arc::new(move |call: ApiCall, instance: Value, args: Vec<Value>| -> HandlerFuture {
                Box::pin(future::ready(f(&call, &instance, &args)))
            });
        self.commands.insert(
            name.to_string(),
            CommandHandler {
                name: name.to_string(),
                arity,
                is_async: false,
                func,
            },
        );
        self
    }

    pub fn build(self) -> Api {
        Api {
            commands: self.commands,
        }
    }
}
