//! `$let` binds user variables for the scope of one sub-expression.
//!
//! ```json
//! {"$let": {"vars": {"total": "$$ROOT.total"}, "in": {"$echo": ["$$total"]}}}
//! ```
//!
//! Bindings are parsed (and evaluated) in the enclosing scope, so a variable
//! cannot refer to a sibling binding. The body sees all of them.

use crate::error::{Fault, FaultResult};
use crate::eval::expression::VARIABLE_SIGIL;
use crate::eval::{join_path, ExecutionContext, Expression, Parser, SystemVariableKind};
use crate::value::Value;

pub const NAME: &str = "$let";

#[derive(Debug, Clone)]
pub struct LetNode {
    vars: Vec<(String, Expression)>,
    body: Box<Expression>,
}

fn check_name(parser: &Parser<'_>, name: &str, path: &str) -> FaultResult<()> {
    let reason = if name.is_empty() || name.starts_with('$') || name.contains('.') {
        format!("Invalid variable name: {:?}", name)
    } else if SystemVariableKind::from_name(name).is_some()
        || parser
            .ctx
            .is_registered(&format!("{}{}", VARIABLE_SIGIL, name))
    {
        format!("Variable {} shadows a system variable", name)
    } else {
        return Ok(());
    };
    Err(Fault::invalid_argument(reason).with_path(path))
}

impl LetNode {
    pub fn parse(parser: &mut Parser<'_>, value: &serde_json::Value, path: &str) -> FaultResult<Self> {
        let form = value
            .as_object()
            .ok_or_else(|| Fault::invalid_argument("$let expects {vars, in}").with_path(path))?;
        let vars_path = join_path(path, "vars");
        let vars = match form.get("vars") {
            None | Some(serde_json::Value::Null) => serde_json::Map::new(),
            Some(serde_json::Value::Object(vars)) => vars.clone(),
            Some(_) => {
                return Err(
                    Fault::invalid_argument("$let vars must be an object").with_path(&vars_path)
                )
            }
        };
        let body = form
            .get("in")
            .ok_or_else(|| Fault::invalid_argument("$let requires in").with_path(path))?;
        if let Some(extra) = form.keys().find(|k| !matches!(k.as_str(), "vars" | "in")) {
            return Err(Fault::invalid_argument(format!("$let: unexpected field {}", extra))
                .with_path(path));
        }

        let mut bound = Vec::with_capacity(vars.len());
        for (name, literal) in &vars {
            let var_path = join_path(&vars_path, name);
            check_name(parser, name, &var_path)?;
            bound.push((name.clone(), parser.parse(literal, &var_path)?));
        }
        let names = bound.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>();
        let body = parser.parse_scoped(names, body, &join_path(path, "in"))?;

        Ok(Self {
            vars: bound,
            body: Box::new(body),
        })
    }

    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|(name, _)| name.as_str())
    }

    pub async fn evaluate(&self, ec: &ExecutionContext) -> FaultResult<Value> {
        let mut values = Vec::with_capacity(self.vars.len());
        for (name, expression) in &self.vars {
            values.push((name.clone(), expression.evaluate(ec).await?));
        }
        self.body.evaluate(&ec.with_variables(values)).await
    }
}
