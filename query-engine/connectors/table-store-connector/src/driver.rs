use crate::{BestEffortSequence, DriverResult, ExecutionResult, Param, Translator};

/// A connection-shaped facade for call sites written against a relational driver.
///
/// `begin_transaction`, `commit` and `rollback` are accepted for compatibility but provide
/// **no atomicity and no isolation**: every statement is applied when it runs and a rollback
/// undoes nothing. See [`BestEffortSequence`].
pub struct DriverConnection {
    sequence: BestEffortSequence,
}

impl DriverConnection {
    pub fn new(translator: Translator) -> Self {
        Self {
            sequence: translator.sequence(),
        }
    }

    /// Runs a statement and returns rows for reads, `{insertId, affectedRows}` for inserts and
    /// `{affectedRows, changedRows}` for updates and deletes.
    pub async fn query(&self, sql: &str, params: &[Param]) -> crate::Result<DriverResult> {
        self.sequence
            .run(sql, params)
            .await
            .map(DriverResult::from_outcome)
    }

    /// Runs a statement and returns the full result envelope.
    pub async fn execute(&self, sql: &str, params: &[Param]) -> ExecutionResult {
        self.sequence.execute(sql, params).await
    }

    pub fn begin_transaction(&self) {
        self.sequence.begin();
    }

    pub fn commit(&self) {
        self.sequence.commit();
    }

    pub fn rollback(&self) {
        self.sequence.rollback();
    }

    pub fn release(&self) {
        self.sequence.release();
    }

    /// Statements run since the last transaction boundary.
    pub fn applied(&self) -> Vec<String> {
        self.sequence.applied()
    }
}
