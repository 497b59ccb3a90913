//! Client that runs one stage query to completion.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{AnalyticalEngine, QueryRequest, QueryState, StageHandle};
use crate::errors::EngineError;

/// Starts a stage query and waits for it to finish.
///
/// Completion is observed by polling at `status_check_interval`. The client
/// itself never gives up; callers bound each invocation with a timeout.
#[derive(Clone)]
pub struct DataStageClient {
    engine: Arc<dyn AnalyticalEngine>,
    status_check_interval: Duration,
}

impl std::fmt::Debug for DataStageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStageClient")
            .field("status_check_interval", &self.status_check_interval)
            .finish_non_exhaustive()
    }
}

impl DataStageClient {
    /// Creates a client polling at `status_check_interval`.
    #[must_use]
    pub fn new(engine: Arc<dyn AnalyticalEngine>, status_check_interval: Duration) -> Self {
        Self {
            engine,
            status_check_interval,
        }
    }

    /// Runs the query and returns where its output landed.
    pub async fn invoke(&self, request: &QueryRequest) -> Result<StageHandle, EngineError> {
        let query_id = self.engine.start_query(request).await?;
        debug!(stage = %request.stage_name, query_id = %query_id, "Stage query started");

        let mut polls: u32 = 0;
        loop {
            match self.engine.query_state(&query_id).await? {
                QueryState::Running => {
                    polls += 1;
                    tokio::time::sleep(self.status_check_interval).await;
                }
                QueryState::Succeeded {
                    output_location,
                    row_count,
                } => {
                    debug!(
                        stage = %request.stage_name,
                        query_id = %query_id,
                        polls,
                        row_count,
                        "Stage query completed"
                    );
                    return Ok(StageHandle {
                        query_id,
                        output_location,
                        row_count,
                    });
                }
                QueryState::Failed(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct PollingEngine {
        states: Mutex<VecDeque<QueryState>>,
        polls: Mutex<usize>,
    }

    impl PollingEngine {
        fn new(states: Vec<QueryState>) -> Self {
            Self {
                states: Mutex::new(states.into()),
                polls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl AnalyticalEngine for PollingEngine {
        async fn start_query(&self, _request: &QueryRequest) -> Result<String, EngineError> {
            Ok("q-1".to_string())
        }

        async fn query_state(&self, _query_id: &str) -> Result<QueryState, EngineError> {
            *self.polls.lock() += 1;
            Ok(self.states.lock().pop_front().unwrap_or(QueryState::Running))
        }
    }

    fn request() -> QueryRequest {
        QueryRequest {
            stage_name: "stage1".to_string(),
            query: "SELECT 1".to_string(),
            as_of_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            output_prefix: "results/exec/stage1/".to_string(),
        }
    }

    #[tokio::test]
    async fn test_invoke_polls_until_success() {
        let engine = Arc::new(PollingEngine::new(vec![
            QueryState::Running,
            QueryState::Running,
            QueryState::Succeeded {
                output_location: "results/exec/stage1/q-1.jsonl".to_string(),
                row_count: 7,
            },
        ]));
        let client = DataStageClient::new(engine.clone(), Duration::from_millis(1));

        let handle = client.invoke(&request()).await.unwrap();

        assert_eq!(handle.query_id, "q-1");
        assert_eq!(handle.row_count, 7);
        assert_eq!(*engine.polls.lock(), 3);
    }

    #[tokio::test]
    async fn test_invoke_surfaces_engine_failure() {
        let engine = Arc::new(PollingEngine::new(vec![QueryState::Failed(
            EngineError::query("TABLE_NOT_FOUND"),
        )]));
        let client = DataStageClient::new(engine, Duration::from_millis(1));

        let err = client.invoke(&request()).await.unwrap_err();
        assert_eq!(err, EngineError::query("TABLE_NOT_FOUND"));
    }
}
