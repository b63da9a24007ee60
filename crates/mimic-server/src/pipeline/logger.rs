use super::{Exchange, Stage, StageOutcome};
use crate::config::Environment;
use crate::request_log::{LogEntry, RequestLog};
use async_trait::async_trait;
use std::sync::Arc;

/// Records every inbound request before anything else runs.
pub struct RequestLogger {
    log: Arc<RequestLog>,
}

impl RequestLogger {
    pub fn new(log: Arc<RequestLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl Stage for RequestLogger {
    fn name(&self) -> &'static str {
        "logger"
    }

    async fn process(&self, exchange: &mut Exchange, _environment: &Environment) -> StageOutcome {
        let entry = LogEntry::capture(&exchange.parts, &exchange.body);
        exchange.log_id = Some(self.log.record(entry));
        StageOutcome::Next
    }
}
