//! JSON expression evaluation: typed values, system and user variables,
//! operator command dispatch, lazy cursors and runtime operation tracking.
//!
//! ```no_run
//! # async fn demo() -> cortex_expressions::FaultResult<()> {
//! use cortex_expressions::{ExpressionEngine, Value};
//! use serde_json::json;
//!
//! let engine = ExpressionEngine::new();
//! let value = engine
//!     .evaluate_literal(&json!({"$echo": ["hello"]}), Value::Null)
//!     .await?;
//! assert_eq!(value, Value::from("hello"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod eval;
pub mod operator;
pub mod runtime;
pub mod types;
pub mod value;

// Re-exports
pub use config::EngineConfig;
pub use cursor::CursorRef;
pub use engine::ExpressionEngine;
pub use error::*;
pub use eval::{AccessContext, ExecutionContext, ExpressionRoot, PassRoot};
pub use operator::{ApiOperator, OperatorRegistry};
pub use runtime::{OperationRegistry, RuntimeOperation};
pub use types::TypeKind;
pub use value::Value;

#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
