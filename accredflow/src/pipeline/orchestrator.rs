//! The four-stage accreditation pipeline state machine.
//!
//! ```text
//! INIT -> STAGE1 -> STAGE2 -> CLASSIFY_DISPATCH -> STAGE4 -> ARCHIVE -> DONE
//!   \________\_________\___________\________________\_________\__> FAILED
//! ```
//!
//! Each state's work runs only after the transition into it. The first
//! unrecoverable error moves the execution to `FAILED`, publishes one
//! operational alert and skips everything that has not started.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::executor::{StageExecutor, StagePolicy};
use super::report::{ExecutionOutcome, ExecutionReport, FacilityOutcome, TriggerRequest};
use crate::cancellation::CancellationToken;
use crate::classify::ExpiryClassifier;
use crate::config::PipelineConfig;
use crate::core::{PipelineExecution, PipelineState};
use crate::engine::{
    AnalyticalEngine, DataStageClient, QueryParams, QueryRequest, STAGE1_FACILITY_SNAPSHOT,
    STAGE2_EXPIRING, STAGE4_AGGREGATE,
};
use crate::errors::{AccredflowError, EngineError};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::extract::{ExtractionReport, RecordExtractor};
use crate::model::TierCounts;
use crate::notify::{
    failure_alert, success_summary, NotificationChannel, NotificationDispatcher,
    NotificationPayload, SuccessSummary,
};
use crate::storage::{ArchiveManifest, ArchiveRequest, Archiver, ObjectStore};

/// Mutable state of one run.
struct RunContext {
    execution: PipelineExecution,
    report: ExecutionReport,
    stage_outputs: Vec<(String, String)>,
    archive: Option<ArchiveManifest>,
}

impl RunContext {
    fn output_of(&self, stage_name: &str) -> Option<&str> {
        self.stage_outputs
            .iter()
            .find(|(name, _)| name == stage_name)
            .map(|(_, location)| location.as_str())
    }
}

/// Sequences the pipeline for one execution at a time per call.
///
/// Independent executions may run concurrently on the same orchestrator;
/// every side effect is keyed on the execution id.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    client: DataStageClient,
    store: Arc<dyn ObjectStore>,
    dispatcher: NotificationDispatcher,
    archiver: Archiver,
    classifier: ExpiryClassifier,
    extractor: RecordExtractor,
    executor: StageExecutor,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("archiver", &self.archiver)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Creates an orchestrator over the three external collaborators.
    pub fn new(
        config: PipelineConfig,
        engine: Arc<dyn AnalyticalEngine>,
        store: Arc<dyn ObjectStore>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Result<Self, AccredflowError> {
        config.validate()?;

        let events: Arc<dyn EventSink> = Arc::new(NoOpEventSink);
        let policy = StagePolicy {
            retry: config.retry.clone(),
            timeout: config.stage_timeout(),
        };

        Ok(Self {
            client: DataStageClient::new(engine, config.status_check_interval()),
            dispatcher: NotificationDispatcher::new(
                channel,
                config.channels.clone(),
                config.max_concurrent_publishes,
                config.publish_timeout(),
            ),
            archiver: Archiver::new(store.clone(), &config.staging_prefix, &config.archive_prefix),
            classifier: ExpiryClassifier::new(config.tier_thresholds),
            extractor: RecordExtractor::new(),
            executor: StageExecutor::new(policy).with_event_sink(events.clone()),
            store,
            events,
            config,
        })
    }

    /// Sets the lifecycle event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.executor = self.executor.with_event_sink(events.clone());
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the notification dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Returns the archiver.
    #[must_use]
    pub fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    /// Runs the pipeline for a trigger request.
    pub async fn trigger(&self, request: TriggerRequest) -> ExecutionOutcome {
        let as_of_date = request
            .as_of_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let execution = match request.execution_id {
            Some(id) => PipelineExecution::with_id(id, as_of_date),
            None => PipelineExecution::new(as_of_date),
        };
        self.execute(execution, &CancellationToken::new()).await
    }

    /// Runs the pipeline under a fresh execution id.
    pub async fn run(&self, as_of_date: NaiveDate, cancel: &CancellationToken) -> ExecutionOutcome {
        self.execute(PipelineExecution::new(as_of_date), cancel).await
    }

    /// Runs the pipeline under a caller-chosen execution id.
    pub async fn run_with_id(
        &self,
        execution_id: impl Into<String>,
        as_of_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        self.execute(PipelineExecution::with_id(execution_id, as_of_date), cancel)
            .await
    }

    async fn execute(
        &self,
        execution: PipelineExecution,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let execution_id = execution.execution_id.clone();
        info!(
            execution_id = %execution_id,
            as_of_date = %execution.as_of_date,
            "Pipeline execution started"
        );
        self.events
            .emit(PipelineEvent::PipelineStarted {
                execution_id: execution_id.clone(),
                as_of_date: execution.as_of_date,
            })
            .await;

        let mut ctx = RunContext {
            report: ExecutionReport::new(&execution_id, execution.as_of_date),
            execution,
            stage_outputs: Vec::new(),
            archive: None,
        };

        let mut state = PipelineState::Init;
        while let Some(next) = state.next() {
            if next != PipelineState::Done {
                if let Err(err) = cancel.checkpoint() {
                    return self.fail(ctx, state, err).await;
                }
            }
            if let Err(err) = self.transition(&ctx, state, next).await {
                return self.fail(ctx, state, err).await;
            }
            state = next;

            if let Err(err) = self.enter(state, &mut ctx).await {
                return self.fail(ctx, state, err).await;
            }
        }

        self.succeed(ctx).await
    }

    async fn transition(
        &self,
        ctx: &RunContext,
        from: PipelineState,
        to: PipelineState,
    ) -> Result<(), AccredflowError> {
        if !from.can_transition_to(to) {
            return Err(AccredflowError::InvalidTransition { from, to });
        }
        info!(
            execution_id = %ctx.execution.execution_id,
            from = %from,
            to = %to,
            "Pipeline transition"
        );
        self.events
            .emit(PipelineEvent::Transition {
                execution_id: ctx.execution.execution_id.clone(),
                from,
                to,
            })
            .await;
        Ok(())
    }

    async fn enter(
        &self,
        state: PipelineState,
        ctx: &mut RunContext,
    ) -> Result<(), AccredflowError> {
        match state {
            PipelineState::Stage1 => {
                let location = self.run_engine_stage(ctx, STAGE1_FACILITY_SNAPSHOT, None).await?;
                let snapshot = self.read_records(&location).await?;
                ctx.report.facilities_processed = snapshot.len();
                ctx.report.records_skipped += snapshot.skipped;
                Ok(())
            }
            PipelineState::Stage2 => {
                let window = Some(self.config.prefilter_window_days);
                self.run_engine_stage(ctx, STAGE2_EXPIRING, window).await?;
                Ok(())
            }
            PipelineState::ClassifyDispatch => self.classify_and_dispatch(ctx).await,
            PipelineState::Stage4 => {
                let window = Some(self.config.notice_window_days);
                self.run_engine_stage(ctx, STAGE4_AGGREGATE, window).await?;
                Ok(())
            }
            PipelineState::Archive => self.archive(ctx).await,
            PipelineState::Init | PipelineState::Done | PipelineState::Failed => Ok(()),
        }
    }

    async fn run_engine_stage(
        &self,
        ctx: &mut RunContext,
        stage_name: &str,
        window_days: Option<i64>,
    ) -> Result<String, AccredflowError> {
        let template = self
            .config
            .queries
            .for_stage(stage_name)
            .ok_or_else(|| EngineError::query(format!("no query configured for {stage_name}")))?;
        let params = QueryParams {
            as_of_date: ctx.execution.as_of_date,
            window_days,
            execution_id: ctx.execution.execution_id.clone(),
        };
        let output_prefix = format!(
            "{}/{}/{}/",
            self.config.output_prefix.trim_end_matches('/'),
            ctx.execution.execution_id,
            stage_name
        );

        let client = &self.client;
        let params = &params;
        let output_prefix = &output_prefix;
        let result = self
            .executor
            .run(&mut ctx.execution, stage_name, |_attempt| async move {
                let query = match template.render(params) {
                    Ok(query) => query,
                    Err(error) => return Err(error),
                };
                let request = QueryRequest {
                    stage_name: stage_name.to_string(),
                    query,
                    as_of_date: params.as_of_date,
                    output_prefix: output_prefix.clone(),
                };
                client.invoke(&request).await
            })
            .await;

        match (result.output_location, result.error) {
            (Some(location), None) => {
                ctx.stage_outputs.push((stage_name.to_string(), location.clone()));
                Ok(location)
            }
            (_, Some(error)) => Err(error.into()),
            (None, None) => {
                let reason = format!("{stage_name} reported no output location");
                Err(EngineError::query(reason).into())
            }
        }
    }

    async fn read_records(&self, location: &str) -> Result<ExtractionReport, AccredflowError> {
        let bytes = self.store.get(location).await?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(self.extractor.extract(&text))
    }

    async fn classify_and_dispatch(&self, ctx: &mut RunContext) -> Result<(), AccredflowError> {
        let location = ctx
            .output_of(STAGE2_EXPIRING)
            .map(str::to_string)
            .ok_or_else(|| EngineError::query("stage 2 output location missing"))?;
        let candidates = self.read_records(&location).await?;

        let as_of_date = ctx.execution.as_of_date;
        let classified = self.classifier.classify_all(candidates.records, as_of_date);

        let report = &mut ctx.report;
        report.candidates = classified.len();
        report.records_skipped += candidates.skipped;
        report.parse_errors = candidates.errors;
        report.tier_counts = classified.iter().collect::<TierCounts>();
        report.invalid_dates = classified.iter().map(|f| f.invalid_dates).sum();
        report.facilities = classified.iter().map(FacilityOutcome::from).collect();

        let dispatch = self
            .dispatcher
            .dispatch(&classified, &ctx.execution.execution_id, as_of_date)
            .await;
        if dispatch.has_failures() {
            warn!(
                execution_id = %ctx.execution.execution_id,
                failures = dispatch.failures.len(),
                "Some tier notifications failed to publish"
            );
        }
        self.events
            .emit(PipelineEvent::DispatchCompleted {
                execution_id: ctx.execution.execution_id.clone(),
                published: dispatch.total_published(),
                duplicates_suppressed: dispatch.duplicates_suppressed,
                failures: dispatch.failures.len(),
            })
            .await;
        ctx.report.dispatch = Some(dispatch);
        Ok(())
    }

    async fn archive(&self, ctx: &mut RunContext) -> Result<(), AccredflowError> {
        let execution_id = ctx.execution.execution_id.clone();

        let mut terminal = ctx.execution.clone();
        terminal.mark_succeeded(self.archiver.location_for(&execution_id));

        let mut request = ArchiveRequest::new(&execution_id)
            .with_document("report", serde_json::to_value(&ctx.report)?)
            .with_document("execution", serde_json::to_value(&terminal)?);
        for (stage_name, location) in &ctx.stage_outputs {
            request = request.with_stage_output(stage_name, location);
        }

        ctx.archive = Some(self.archiver.archive(&request).await?);
        Ok(())
    }

    async fn publish_operational(&self, execution_id: &str, payload: &NotificationPayload) {
        if let Err(err) = self.dispatcher.publish_operational(payload).await {
            error!(
                execution_id = %execution_id,
                error = %err,
                "Failed to publish operational notification"
            );
        }
    }

    async fn fail(
        &self,
        mut ctx: RunContext,
        state: PipelineState,
        err: AccredflowError,
    ) -> ExecutionOutcome {
        let execution_id = ctx.execution.execution_id.clone();
        error!(
            execution_id = %execution_id,
            state = %state,
            kind = err.kind(),
            error = %err,
            "Pipeline execution failed"
        );
        ctx.execution.mark_failed(state, &err);
        self.dispatcher.release_execution(&execution_id);

        self.events
            .emit(PipelineEvent::Transition {
                execution_id: execution_id.clone(),
                from: state,
                to: PipelineState::Failed,
            })
            .await;
        self.events
            .emit(PipelineEvent::PipelineFailed {
                execution_id: execution_id.clone(),
                state,
                kind: err.kind().to_string(),
                message: err.to_string(),
            })
            .await;

        self.publish_operational(&execution_id, &failure_alert(&ctx.execution))
            .await;

        ExecutionOutcome {
            execution: ctx.execution,
            final_state: PipelineState::Failed,
            report: ctx.report,
            archive: None,
        }
    }

    async fn succeed(&self, mut ctx: RunContext) -> ExecutionOutcome {
        let execution_id = ctx.execution.execution_id.clone();
        let location = ctx
            .archive
            .as_ref()
            .map_or_else(|| self.archiver.location_for(&execution_id), |m| m.location.clone());
        ctx.execution.mark_succeeded(&location);
        self.dispatcher.release_execution(&execution_id);

        let summary = SuccessSummary {
            execution_id: execution_id.clone(),
            as_of_date: ctx.execution.as_of_date,
            facilities_processed: ctx.report.facilities_processed,
            expiring_found: ctx.report.expiring_found(),
            dispatched: ctx
                .report
                .dispatch
                .as_ref()
                .map(|d| d.published)
                .unwrap_or_default(),
            dispatch_failures: ctx.report.dispatch_failures(),
            records_skipped: ctx.report.records_skipped,
            archive_location: location.clone(),
        };
        self.publish_operational(&execution_id, &success_summary(&summary))
            .await;

        info!(
            execution_id = %execution_id,
            archive_location = %location,
            attempts = ctx.execution.total_attempts(),
            "Pipeline execution succeeded"
        );
        self.events
            .emit(PipelineEvent::PipelineCompleted {
                execution_id,
                archive_location: location,
            })
            .await;

        ExecutionOutcome {
            execution: ctx.execution,
            final_state: PipelineState::Done,
            report: ctx.report,
            archive: ctx.archive,
        }
    }
}
