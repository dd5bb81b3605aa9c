use chrono::Utc;
use rand::Rng;
use strum_macros::{Display, EnumIter, EnumString};
use tracing::debug;

use super::context::{ExecutionContext, CURSOR_VARIABLE, OUTPUT_VARIABLE};
use super::expression::ParseContext;
use crate::error::{Fault, FaultResult};
use crate::value::{read_object, Value};

/// Reserved `$$NAME` identifiers resolved against the execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SystemVariableKind {
    Now,
    Date,
    Random,
    Root,
    Context,
    Request,
    Script,
    Env,
    Var,
    Cursor,
    Close,
}

impl SystemVariableKind {
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// `$$NAME` form.
    pub fn token(&self) -> String {
        format!("$${}", self)
    }

    pub fn allows_path(&self) -> bool {
        matches!(
            self,
            SystemVariableKind::Root
                | SystemVariableKind::Context
                | SystemVariableKind::Request
                | SystemVariableKind::Script
                | SystemVariableKind::Env
                | SystemVariableKind::Var
        )
    }

    /// Registered on the expression root at parse time and memoised on the
    /// pass root at evaluation time.
    pub fn is_pass_scoped(&self) -> bool {
        matches!(
            self,
            SystemVariableKind::Now | SystemVariableKind::Request | SystemVariableKind::Script
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemVariable {
    pub kind: SystemVariableKind,
    /// Residual dotted path after the variable token.
    pub path: String,
    /// The original literal.
    pub query: String,
}

impl SystemVariable {
    /// Validates that `query` starts with the variable's token and strips it.
    pub fn parse(
        kind: SystemVariableKind,
        query: &str,
        ctx: &mut ParseContext,
        node_path: &str,
    ) -> FaultResult<Self> {
        let token = kind.token();
        let residual = query
            .strip_prefix(token.as_str())
            .filter(|rest| rest.is_empty() || rest.starts_with('.'))
            .ok_or_else(|| {
                Fault::invalid_argument(format!("Expected {} but got {}", token, query))
                    .with_path(node_path)
            })?;
        let path = residual.trim_start_matches('.').to_string();

        if !path.is_empty() && !kind.allows_path() {
            return Err(Fault::invalid_argument(format!(
                "{} does not accept a path",
                token
            ))
            .with_path(node_path));
        }
        if kind.is_pass_scoped() {
            ctx.register_variable(&token);
        }
        Ok(Self {
            kind,
            path,
            query: query.to_string(),
        })
    }

    pub async fn evaluate(&self, ec: &ExecutionContext) -> FaultResult<Value> {
        let value = match self.kind {
            SystemVariableKind::Now => ec
                .root()
                .memoize(&self.kind.token(), || Value::Date(Utc::now())),
            SystemVariableKind::Date => Value::Date(Utc::now()),
            SystemVariableKind::Random => Value::Number(rand::thread_rng().gen::<f64>()),
            SystemVariableKind::Root => ec.root().document().clone(),
            SystemVariableKind::Context => ec.subject().clone(),
            SystemVariableKind::Request => ec
                .root()
                .memoize(&self.kind.token(), || Value::from(ec.ac().request.clone())),
            SystemVariableKind::Script => ec
                .root()
                .memoize(&self.kind.token(), || Value::from(ec.ac().script.clone())),
            SystemVariableKind::Env => Value::from(ec.ac().org.clone()),
            SystemVariableKind::Var => {
                return Ok(match self.path.split_once('.') {
                    _ if self.path.is_empty() => ec.host_variables(),
                    Some((name, rest)) => ec
                        .get_variable(name)
                        .map(|v| read_object(&v, rest))
                        .unwrap_or_default(),
                    None => ec.get_variable(&self.path).unwrap_or_default(),
                });
            }
            SystemVariableKind::Cursor => ec.get_variable(CURSOR_VARIABLE).unwrap_or_default(),
            SystemVariableKind::Close => {
                if let Some(Value::Cursor(cursor)) = ec.get_variable(OUTPUT_VARIABLE) {
                    cursor.close().await?;
                    debug!("output cursor closed");
                }
                Value::Undefined
            }
        };
        Ok(read_object(&value, &self.path))
    }
}
