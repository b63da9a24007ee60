use super::{Exchange, Stage, StageOutcome};
use crate::config::Environment;
use async_trait::async_trait;
use std::time::Duration;

/// Suspend the current request for `ms` milliseconds. Zero returns at once.
pub async fn wait(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Applies the environment-wide latency to every request, matched or not.
pub struct EnvironmentLatency;

#[async_trait]
impl Stage for EnvironmentLatency {
    fn name(&self) -> &'static str {
        "latency"
    }

    async fn process(&self, _exchange: &mut Exchange, environment: &Environment) -> StageOutcome {
        wait(environment.latency).await;
        StageOutcome::Next
    }
}
