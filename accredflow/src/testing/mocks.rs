//! Scripted doubles for the engine, channel and store seams.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::engine::{AnalyticalEngine, QueryRequest, QueryState};
use crate::errors::{EngineError, PublishError, StorageError};
use crate::notify::{NotificationChannel, NotificationPayload};
use crate::storage::{InMemoryObjectStore, ObjectStore};

/// What the scripted engine does with one started query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Writes `body` as the query output after `pending_polls` running polls.
    Succeed {
        /// NDJSON output.
        body: String,
        /// Polls answered with `Running` before completion.
        pending_polls: u32,
    },
    /// Reports the query failed.
    Fail(EngineError),
    /// Refuses to start the query.
    Reject(EngineError),
    /// Never finishes.
    Hang,
}

impl ScriptStep {
    /// Immediate success with `body`.
    #[must_use]
    pub fn succeed(body: impl Into<String>) -> Self {
        Self::Succeed {
            body: body.into(),
            pending_polls: 0,
        }
    }

    /// A transient failure.
    #[must_use]
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Fail(EngineError::transient(reason))
    }

    /// A fatal query failure.
    #[must_use]
    pub fn query_error(reason: impl Into<String>) -> Self {
        Self::Fail(EngineError::query(reason))
    }
}

#[derive(Debug)]
struct RunningQuery {
    step: ScriptStep,
    polls: u32,
    output_location: String,
}

/// An analytical engine driven by per-stage scripts.
///
/// Each started query consumes the next step scripted for its stage; a stage
/// with no steps left succeeds with an empty output. Successful outputs are
/// written to the backing store, like a real engine writing results.
#[derive(Debug)]
pub struct ScriptedEngine {
    store: Arc<InMemoryObjectStore>,
    scripts: Mutex<HashMap<String, VecDeque<ScriptStep>>>,
    running: Mutex<HashMap<String, RunningQuery>>,
    requests: Mutex<Vec<QueryRequest>>,
}

impl ScriptedEngine {
    /// Creates an engine writing outputs to `store`.
    #[must_use]
    pub fn new(store: Arc<InMemoryObjectStore>) -> Self {
        Self {
            store,
            scripts: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Appends a step to a stage's script.
    #[must_use]
    pub fn with_step(self, stage_name: &str, step: ScriptStep) -> Self {
        self.push_step(stage_name, step);
        self
    }

    /// Appends a step to a stage's script.
    pub fn push_step(&self, stage_name: &str, step: ScriptStep) {
        self.scripts
            .lock()
            .entry(stage_name.to_string())
            .or_default()
            .push_back(step);
    }

    /// Number of queries started (or refused) for a stage.
    #[must_use]
    pub fn invocations(&self, stage_name: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.stage_name == stage_name)
            .count()
    }

    /// Every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AnalyticalEngine for ScriptedEngine {
    async fn start_query(&self, request: &QueryRequest) -> Result<String, EngineError> {
        let query_id = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            format!("{}-q{}", request.stage_name, requests.len())
        };

        let step = self
            .scripts
            .lock()
            .get_mut(&request.stage_name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| ScriptStep::succeed(""));

        if let ScriptStep::Reject(err) = step {
            return Err(err);
        }

        self.running.lock().insert(
            query_id.clone(),
            RunningQuery {
                step,
                polls: 0,
                output_location: format!("{}{query_id}.jsonl", request.output_prefix),
            },
        );
        Ok(query_id)
    }

    async fn query_state(&self, query_id: &str) -> Result<QueryState, EngineError> {
        let (body, output_location) = {
            let mut running = self.running.lock();
            let query = running
                .get_mut(query_id)
                .ok_or_else(|| EngineError::query(format!("unknown query {query_id}")))?;
            query.polls += 1;

            match &query.step {
                ScriptStep::Hang => return Ok(QueryState::Running),
                ScriptStep::Fail(err) | ScriptStep::Reject(err) => {
                    return Ok(QueryState::Failed(err.clone()))
                }
                ScriptStep::Succeed {
                    pending_polls,
                    ..
                } if query.polls <= *pending_polls => return Ok(QueryState::Running),
                ScriptStep::Succeed { body, .. } => (body.clone(), query.output_location.clone()),
            }
        };

        let row_count = body.lines().filter(|l| !l.trim().is_empty()).count() as u64;
        self.store.insert(output_location.clone(), body);
        Ok(QueryState::Succeeded {
            output_location,
            row_count,
        })
    }
}

/// A notification channel that records every publish.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    published: Mutex<Vec<(String, NotificationPayload)>>,
    failing_facilities: Mutex<HashSet<String>>,
    failing_channels: Mutex<HashSet<String>>,
}

impl RecordingChannel {
    /// Creates a channel that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every publish about `facility_id`.
    pub fn fail_facility(&self, facility_id: &str) {
        self.failing_facilities.lock().insert(facility_id.to_string());
    }

    /// Fails every publish to `channel`.
    pub fn fail_channel(&self, channel: &str) {
        self.failing_channels.lock().insert(channel.to_string());
    }

    /// Stops injecting failures.
    pub fn clear_failures(&self) {
        self.failing_facilities.lock().clear();
        self.failing_channels.lock().clear();
    }

    /// Every successful publish, in order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, NotificationPayload)> {
        self.published.lock().clone()
    }

    /// Number of successful publishes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    /// Returns true if nothing was published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }

    /// Payloads published to `channel`.
    #[must_use]
    pub fn on_channel(&self, channel: &str) -> Vec<NotificationPayload> {
        self.published
            .lock()
            .iter()
            .filter(|(name, _)| name == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Facility ids published to `channel`, in publish order.
    #[must_use]
    pub fn facilities_on(&self, channel: &str) -> Vec<String> {
        self.on_channel(channel)
            .iter()
            .filter_map(|p| p.attributes.get("facility_id")?.as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn publish(
        &self,
        channel: &str,
        payload: &NotificationPayload,
    ) -> Result<(), PublishError> {
        let facility_id = payload
            .attributes
            .get("facility_id")
            .and_then(serde_json::Value::as_str);

        if self.failing_channels.lock().contains(channel) {
            let err = PublishError::new(channel, "channel unavailable");
            return Err(match facility_id {
                Some(id) => err.with_facility(id),
                None => err,
            });
        }
        if let Some(id) = facility_id {
            if self.failing_facilities.lock().contains(id) {
                return Err(
                    PublishError::new(channel, "endpoint rejected message").with_facility(id)
                );
            }
        }

        self.published
            .lock()
            .push((channel.to_string(), payload.clone()));
        Ok(())
    }
}

/// An object store wrapper that injects faults.
pub struct FaultyStore {
    inner: Arc<dyn ObjectStore>,
    fail_finalize: bool,
    fail_reads_under: Option<String>,
    corrupt_reads_under: Option<String>,
}

impl std::fmt::Debug for FaultyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyStore")
            .field("fail_finalize", &self.fail_finalize)
            .field("fail_reads_under", &self.fail_reads_under)
            .field("corrupt_reads_under", &self.corrupt_reads_under)
            .finish_non_exhaustive()
    }
}

impl FaultyStore {
    /// Wraps `inner` without any faults.
    #[must_use]
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            fail_finalize: false,
            fail_reads_under: None,
            corrupt_reads_under: None,
        }
    }

    /// Makes every `finalize` fail.
    #[must_use]
    pub fn fail_finalize(mut self) -> Self {
        self.fail_finalize = true;
        self
    }

    /// Makes reads of keys under `prefix` fail.
    #[must_use]
    pub fn fail_reads_under(mut self, prefix: impl Into<String>) -> Self {
        self.fail_reads_under = Some(prefix.into());
        self
    }

    /// Makes reads of keys under `prefix` return altered bytes.
    #[must_use]
    pub fn corrupt_reads_under(mut self, prefix: impl Into<String>) -> Self {
        self.corrupt_reads_under = Some(prefix.into());
        self
    }
}

fn under(prefix: Option<&String>, key: &str) -> bool {
    prefix.is_some_and(|p| key.starts_with(p.as_str()))
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        if under(self.fail_reads_under.as_ref(), key) {
            return Err(StorageError::Backend(format!("injected read failure for {key}")));
        }
        let mut bytes = self.inner.get(key).await?;
        if under(self.corrupt_reads_under.as_ref(), key) {
            bytes.push(b'!');
        }
        Ok(bytes)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.inner.put(key, bytes).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }

    async fn finalize(&self, staging_prefix: &str, final_prefix: &str) -> Result<(), StorageError> {
        if self.fail_finalize {
            return Err(StorageError::Backend("injected finalize failure".to_string()));
        }
        self.inner.finalize(staging_prefix, final_prefix).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        self.inner.delete_prefix(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn request(stage: &str) -> QueryRequest {
        QueryRequest {
            stage_name: stage.to_string(),
            query: "SELECT 1".to_string(),
            as_of_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            output_prefix: format!("results/exec-1/{stage}/"),
        }
    }

    #[tokio::test]
    async fn test_scripted_engine_follows_script() {
        let store = Arc::new(InMemoryObjectStore::new());
        let engine = ScriptedEngine::new(store.clone())
            .with_step("s1", ScriptStep::transient("throttled"))
            .with_step(
                "s1",
                ScriptStep::Succeed {
                    body: "{}\n{}\n".to_string(),
                    pending_polls: 1,
                },
            );

        let first = engine.start_query(&request("s1")).await.unwrap();
        assert!(matches!(
            engine.query_state(&first).await.unwrap(),
            QueryState::Failed(EngineError::Transient { .. })
        ));

        let second = engine.start_query(&request("s1")).await.unwrap();
        assert_eq!(engine.query_state(&second).await.unwrap(), QueryState::Running);
        match engine.query_state(&second).await.unwrap() {
            QueryState::Succeeded {
                output_location,
                row_count,
            } => {
                assert_eq!(row_count, 2);
                assert!(store.contains(&output_location));
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(engine.invocations("s1"), 2);
    }

    #[tokio::test]
    async fn test_recording_channel_failures() {
        let channel = RecordingChannel::new();
        channel.fail_channel("down");
        let payload = NotificationPayload {
            subject: "s".to_string(),
            message: "m".to_string(),
            attributes: serde_json::json!({"facility_id": "A"}),
        };

        let err = channel.publish("down", &payload).await.unwrap_err();
        assert_eq!(err.facility_id.as_deref(), Some("A"));
        assert!(channel.publish("up", &payload).await.is_ok());
        assert_eq!(channel.facilities_on("up"), vec!["A".to_string()]);
    }
}
