use std::sync::Arc;

use tracing::{Instrument, debug, info_span};

use crate::{
    BestEffortSequence, ConnectorConfig, DriverResult, ExecutionResult, Param, TableStore,
    queries::{self, Context},
    result::Outcome,
    statement::parse,
    store::StoreHandle,
};

/// Compiles statements into table store requests and runs them.
///
/// The translator holds the injected store handle and the configuration; it is cheap to clone
/// and safe to share between concurrent callers.
#[derive(Clone)]
pub struct Translator {
    store: StoreHandle,
    config: Arc<ConnectorConfig>,
}

impl Translator {
    pub fn new(store: Arc<dyn TableStore>, config: ConnectorConfig) -> Self {
        Self {
            store: StoreHandle::new(store),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Runs one statement. Failures are reported inside the envelope, never as `Err`.
    pub async fn execute(&self, sql: &str, params: &[Param]) -> ExecutionResult {
        match self.run(sql, params).await {
            Ok(outcome) => ExecutionResult::from_outcome(outcome),
            Err(err) => {
                debug!(error = %err, "statement failed");
                ExecutionResult::from_error(err)
            }
        }
    }

    /// Runs one statement and answers in the shape relational drivers use.
    pub async fn execute_driver(&self, sql: &str, params: &[Param]) -> crate::Result<DriverResult> {
        self.run(sql, params).await.map(DriverResult::from_outcome)
    }

    /// Starts a non-atomic statement sequence. See [`BestEffortSequence`].
    pub fn sequence(&self) -> BestEffortSequence {
        BestEffortSequence::new(self.clone())
    }

    pub(crate) async fn run(&self, sql: &str, params: &[Param]) -> crate::Result<Outcome> {
        let statement = parse(sql)?;

        let span = info_span!(
            "table_store:execute",
            kind = %statement.kind(),
            table = statement.table(),
            params = params.len(),
        );

        let ctx = Context {
            store: &self.store,
            config: &self.config,
        };

        queries::execute(&ctx, &statement, params).instrument(span).await
    }
}
