use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::error::FaultResult;
use crate::eval::{AccessContext, ExecutionContext, ExpressionRoot, PassRoot};
use crate::operator::OperatorRegistry;
use crate::runtime::{drain, DrainReport, OperationRegistry, RuntimeCommands, RuntimeOperation};
use crate::value::Value;

/// Operation type of a single evaluation pass.
pub const EVALUATION_OPERATION: &str = "expression.evaluate";

/// Parses and evaluates expressions against one configured operator
/// registry. Every pass runs as a [`RuntimeOperation`] in the engine's
/// operation registry, so passes can be listed, cancelled and drained.
pub struct ExpressionEngine {
    config: Arc<EngineConfig>,
    operators: Arc<OperatorRegistry>,
    operations: Arc<OperationRegistry>,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::from_config(EngineConfig::default())
    }
}

impl ExpressionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: EngineConfig) -> Self {
        let operators = Arc::new(OperatorRegistry::with_config(&config));
        Self {
            config: Arc::new(config),
            operators,
            operations: Arc::new(OperationRegistry::new()),
        }
    }

    /// Replaces the built-in operator set, e.g. to add host operators.
    pub fn with_operators(mut self, operators: OperatorRegistry) -> Self {
        self.operators = Arc::new(operators);
        self
    }

    /// Shares an existing operation registry, e.g. the process-wide one.
    pub fn with_operations(mut self, operations: Arc<OperationRegistry>) -> Self {
        self.operations = operations;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    pub fn operations(&self) -> &Arc<OperationRegistry> {
        &self.operations
    }

    pub fn commands(&self) -> RuntimeCommands {
        RuntimeCommands::new(self.operations.clone())
    }

    pub fn parse(&self, literal: &serde_json::Value) -> FaultResult<ExpressionRoot> {
        ExpressionRoot::parse(literal, &self.operators)
    }

    /// Runs one pass of `root`. A cursor result keeps its operation
    /// registered until the cursor is closed or the operation is cancelled.
    #[instrument(level = "debug", skip_all)]
    pub async fn evaluate<I>(
        &self,
        root: &ExpressionRoot,
        ac: AccessContext,
        document: Value,
        variables: I,
    ) -> FaultResult<Value>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let operation = RuntimeOperation::builder(EVALUATION_OPERATION)
            .registry(self.operations.clone())
            .context(ac.request.clone())
            .build();
        operation.start()?;

        let pass = PassRoot::new(document)
            .with_config(self.config.clone())
            .with_operation(operation.clone())
            .with_variables(variables);
        let ec = ExecutionContext::new(pass, ac);

        let result = root.evaluate(&ec).await;
        match &result {
            Ok(Value::Cursor(cursor)) => {
                debug!("operation {} returned a cursor", operation.uuid());
                operation.release_on_close(cursor.clone());
            }
            // no-op when a cancel already stopped it
            _ => operation.stop().await?,
        }
        result
    }

    /// Parses and evaluates `literal` once against `document`.
    pub async fn evaluate_literal(
        &self,
        literal: &serde_json::Value,
        document: Value,
    ) -> FaultResult<Value> {
        let root = self.parse(literal)?;
        self.evaluate(&root, AccessContext::default(), document, std::iter::empty())
            .await
    }

    /// Waits for operations with open cursors, then aborts the rest.
    pub async fn shutdown(&self) -> DrainReport {
        let report = drain(&self.operations, &self.config.shutdown).await;
        info!(
            "engine shut down: {} drained, {} aborted",
            report.drained, report.aborted
        );
        report
    }
}
