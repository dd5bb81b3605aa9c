//! Expression trees and their evaluation context.
//!
//! A JSON literal is parsed once into an [`ExpressionRoot`] and evaluated any
//! number of times. Each evaluation is a *pass* with its own [`PassRoot`]:
//! pass-scoped system variables (`$$NOW`, `$$REQUEST`, `$$SCRIPT`) are
//! memoised there, so concurrent passes never observe each other's values.

pub mod context;
pub mod expression;
pub mod system_variable;

pub use context::{AccessContext, ExecutionContext, PassRoot, CURSOR_VARIABLE, OUTPUT_VARIABLE};
pub use expression::{
    join_path, Expression, ExpressionKind, ExpressionRoot, ParseContext, Parser,
};
pub use system_variable::{SystemVariable, SystemVariableKind};
