//! API-style operators: `{"$name": [input, {"command": [args...]}, "bare", ...]}`.
//!
//! An operator parses an optional input expression followed by an ordered
//! list of commands, each validated against the operator's static command
//! table ([`Api`]). Evaluation threads an *instance* through the commands:
//! `initialize_instance` builds it from the input, each command handler
//! receives it, and `finalize_instance` turns the final state into the
//! node's value. Chaining operators feed every command's result back in as
//! the next instance.
//!
//! Command tables are built once per operator, merging the operator's own
//! commands with the functions of its sandbox module, if any.

pub mod api;
pub mod console;
pub mod cursor_op;
pub mod echo;
pub mod http;
pub mod intl;
pub mod let_op;
pub mod literal;
pub mod moment;
pub mod sandbox;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{instrument, trace};

use crate::config::EngineConfig;
use crate::error::{Fault, FaultResult};
use crate::eval::{join_path, ExecutionContext, Expression, Parser};
use crate::value::Value;

pub use api::{Api, ApiBuilder, ApiCall, Arity, CommandHandler, HandlerFn, HandlerFuture};
pub use sandbox::{SandboxModule, SandboxModuleBuilder, SandboxModules};

/// User variable bound to the current instance while a chaining operator
/// evaluates command parameters.
pub const INSTANCE_VARIABLE: &str = "instance";

#[async_trait]
pub trait ApiOperator: Send + Sync {
    /// Key of the operator in literals, e.g. `$moment`.
    fn name(&self) -> &'static str;

    /// Locally declared commands.
    fn api(&self) -> Api {
        Api::default()
    }

    fn sandbox_module(&self) -> Option<&'static str> {
        None
    }

    /// Sandbox functions receive all parameters as one array.
    fn sandbox_params_as_array(&self) -> bool {
        false
    }

    fn multiple_commands(&self) -> bool {
        false
    }

    fn chain_commands(&self) -> bool {
        false
    }

    async fn initialize_instance(
        &self,
        _ec: &ExecutionContext,
        _input: Value,
        _commands: &[ParsedCommand],
    ) -> FaultResult<Value> {
        Ok(Value::Undefined)
    }

    async fn finalize_instance(
        &self,
        _ec: &ExecutionContext,
        _instance: Value,
        last: Value,
        _commands: &[ParsedCommand],
    ) -> FaultResult<Value> {
        Ok(last)
    }
}

/// An operator bound to the sandbox modules it may pull commands from. The
/// merged command table is built on first use.
pub struct BoundOperator {
    operator: Arc<dyn ApiOperator>,
    modules: Arc<SandboxModules>,
    api: OnceLock<Api>,
}

impl fmt::Debug for BoundOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundOperator")
            .field("name", &self.operator.name())
            .finish()
    }
}

impl BoundOperator {
    pub fn new(operator: Arc<dyn ApiOperator>, modules: Arc<SandboxModules>) -> Self {
        Self {
            operator,
            modules,
            api: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.operator.name()
    }

    pub fn operator(&self) -> &dyn ApiOperator {
        self.operator.as_ref()
    }

    pub fn api(&self) -> &Api {
        self.api.get_or_init(|| {
            let mut api = self.operator.api();
            if let Some(module) = self
                .operator
                .sandbox_module()
                .and_then(|name| self.modules.get(name))
            {
                let module_api = if self.operator.sandbox_params_as_array() {
                    module.api().clone().map_handlers(CommandHandler::variadic)
                } else {
                    module.api().clone()
                };
                api.merge(&module_api);
            }
            api
        })
    }
}

#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub name: String,
    pub handler: CommandHandler,
    pub params: Vec<Expression>,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ApiNode {
    operator: Arc<BoundOperator>,
    input: Option<Box<Expression>>,
    commands: Vec<ParsedCommand>,
    path: String,
}

fn single_key(value: &serde_json::Value) -> Option<(&String, &serde_json::Value)> {
    match value {
        serde_json::Value::Object(map) if map.len() == 1 => map.iter().next(),
        _ => None,
    }
}

impl ApiNode {
    pub fn parse(
        operator: Arc<BoundOperator>,
        parser: &mut Parser<'_>,
        value: &serde_json::Value,
        path: &str,
    ) -> FaultResult<Self> {
        let name = operator.name();
        let api = operator.api();
        let items: Vec<serde_json::Value> = match value {
            serde_json::Value::Null => vec![],
            serde_json::Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };

        let mut input = None;
        let mut commands = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let item_path = join_path(path, &index.to_string());
            let (command, args) = match (index, item, single_key(item)) {
                (_, _, Some((key, args)))
                    if !key.starts_with('$') && (index > 0 || api.contains(key)) =>
                {
                    (key.as_str(), args.clone())
                }
                (0, _, _) => {
                    input = Some(Box::new(parser.parse(item, &item_path)?));
                    continue;
                }
                (_, serde_json::Value::String(bare), _) => {
                    (bare.as_str(), serde_json::Value::Array(vec![]))
                }
                _ => {
                    return Err(Fault::invalid_argument(format!(
                        "{} expects {{command: args}} or a command name",
                        name
                    ))
                    .with_path(&item_path))
                }
            };

            let handler = api
                .get(command)
                .cloned()
                .ok_or_else(|| Fault::unknown_command(name, command).with_path(&item_path))?;
            if !commands.is_empty() && !operator.operator().multiple_commands() {
                return Err(Fault::invalid_argument(format!(
                    "{} does not support multiple commands",
                    name
                ))
                .with_path(&item_path));
            }

            let args = match args {
                serde_json::Value::Null => vec![],
                serde_json::Value::Array(args) => args,
                other => vec![other],
            };
            let command_path = join_path(&item_path, command);
            let scope: Vec<String> = if operator.operator().chain_commands() {
                vec![INSTANCE_VARIABLE.to_string()]
            } else {
                vec![]
            };
            let params = args
                .iter()
                .enumerate()
                .map(|(i, arg)| {
                    parser.parse_scoped(scope.clone(), arg, &join_path(&command_path, &i.to_string()))
                })
                .collect::<FaultResult<Vec<_>>>()?;

            commands.push(ParsedCommand {
                name: command.to_string(),
                handler,
                params,
                path: item_path,
            });
        }

        Ok(Self {
            operator,
            input,
            commands,
            path: path.to_string(),
        })
    }

    pub fn commands(&self) -> &[ParsedCommand] {
        &self.commands
    }

    pub fn input(&self) -> Option<&Expression> {
        self.input.as_deref()
    }

    #[instrument(level = "trace", skip_all, fields(operator = self.operator.name(), path = %self.path))]
    pub async fn evaluate(&self, ec: &ExecutionContext) -> FaultResult<Value> {
        let operator = self.operator.operator();
        let input = match &self.input {
            Some(input) => input.evaluate(ec).await?,
            None => Value::Undefined,
        };
        let mut instance = operator
            .initialize_instance(ec, input, &self.commands)
            .await
            .map_err(|e| e.or_path(&self.path))?;

        let chain = operator.chain_commands();
        let mut last = Value::Undefined;
        for command in &self.commands {
            ec.check_cancelled().map_err(|e| e.or_path(&command.path))?;
            let scope = if chain {
                ec.with_variable(INSTANCE_VARIABLE, instance.clone())
            } else {
                ec.clone()
            };
            let params = try_join_all(command.params.iter().map(|p| p.evaluate(&scope))).await?;
            trace!("{}.{} with {} params", self.operator.name(), command.name, params.len());

            let call = ApiCall {
                ec: ec.clone(),
                operator: self.operator.name(),
                command: command.name.clone(),
                path: command.path.clone(),
            };
            let result = command
                .handler
                .invoke(call, instance.clone(), params)
                .await
                .map_err(|e| e.or_path(&command.path))?;
            if chain {
                instance = result.clone();
            }
            last = result;
        }

        operator
            .finalize_instance(ec, instance, last, &self.commands)
            .await
    }
}

/// Registry of API operators by literal key.
pub struct OperatorRegistry {
    operators: HashMap<&'static str, Arc<BoundOperator>>,
    modules: Arc<SandboxModules>,
}

impl OperatorRegistry {
    pub fn new(modules: Arc<SandboxModules>) -> Self {
        Self {
            operators: HashMap::new(),
            modules,
        }
    }

    /// Every built-in operator with default modules and config.
    pub fn with_defaults() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        let modules = SandboxModules::new();
        modules.register(console::module());
        modules.register(http::module(Arc::new(http::ReqwestHttpClient::new(
            &config.http,
        ))));
        Self::with_modules(Arc::new(modules))
    }

    /// Every built-in operator bound to `modules`.
    pub fn with_modules(modules: Arc<SandboxModules>) -> Self {
        let mut registry = Self::new(modules);
        registry.register(Arc::new(echo::EchoOperator));
        registry.register(Arc::new(console::ConsoleOperator));
        registry.register(Arc::new(http::HttpOperator));
        registry.register(Arc::new(intl::IntlOperator));
        registry.register(Arc::new(moment::MomentOperator));
        registry.register(Arc::new(cursor_op::CursorOperator));
        registry
    }

    pub fn register(&mut self, operator: Arc<dyn ApiOperator>) {
        let bound = BoundOperator::new(operator, self.modules.clone());
        self.operators.insert(bound.name(), Arc::new(bound));
    }

    pub fn get(&self, name: &str) -> Option<Arc<BoundOperator>> {
        self.operators.get(name).cloned()
    }

    pub fn modules(&self) -> &Arc<SandboxModules> {
        &self.modules
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.operators.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
