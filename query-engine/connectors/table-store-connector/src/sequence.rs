use parking_lot::Mutex;
use tracing::warn;

use crate::{ExecutionResult, Param, Translator, result::Outcome};

/// A sequence of statements that is **not** a transaction.
///
/// The table store offers no multi-statement transaction to this layer. Every statement run
/// through a sequence is applied immediately and stays applied: [`rollback`](Self::rollback)
/// only forgets the call log, and concurrent sequences interleave freely at the store.
/// The log exists so callers can see what a failed sequence already changed.
pub struct BestEffortSequence {
    translator: Translator,
    log: Mutex<Vec<String>>,
}

impl BestEffortSequence {
    pub fn new(translator: Translator) -> Self {
        Self {
            translator,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Clears the call log.
    pub fn begin(&self) {
        self.log.lock().clear();
    }

    pub async fn execute(&self, sql: &str, params: &[Param]) -> ExecutionResult {
        self.record(sql);
        self.translator.execute(sql, params).await
    }

    pub(crate) async fn run(&self, sql: &str, params: &[Param]) -> crate::Result<Outcome> {
        self.record(sql);
        self.translator.run(sql, params).await
    }

    pub fn record(&self, sql: &str) {
        self.log.lock().push(sql.to_owned());
    }

    /// Statements sent since the last `begin`, `commit` or `rollback`.
    pub fn applied(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Clears the call log. Nothing is made durable here; it already is.
    pub fn commit(&self) {
        self.log.lock().clear();
    }

    /// Clears the call log. Nothing is undone.
    pub fn rollback(&self) {
        let mut log = self.log.lock();

        if !log.is_empty() {
            warn!(
                applied = log.len(),
                "rollback requested on a best-effort sequence, already applied statements stay applied"
            );
        }

        log.clear();
    }

    pub fn release(&self) {}
}
