//! The scan cycle: change detection followed by the fixed stage sequence.
//!
//! 1. Record the cycle start
//! 2. Ask the change detector for new work since the last scan
//! 3. Run enabled stages in order, stopping at the first failure
//! 4. Record the cycle start as the last scan time and report

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cncflow_detector::ChangeDetector;
use cncflow_invoker::ServiceInvoker;
use cncflow_shared::{
    AppConfig, CncFlowError, CycleId, Result, ServiceEndpoint, Stage, StageOutcome, StageResult,
};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, instrument};

use crate::report::{CycleOutcome, CycleReport, CycleReporter, SilentReporter, Trigger};

// ---------------------------------------------------------------------------
// State & status
// ---------------------------------------------------------------------------

/// Mutable controller state. Only the running cycle writes the scan time.
#[derive(Debug, Clone, Default)]
pub struct CycleState {
    /// Start of the last finished cycle.
    pub last_successful_scan: Option<DateTime<Utc>>,
    /// Whether the timer scheduler is started.
    pub running: bool,
}

/// Read-only view returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub cycle_in_progress: bool,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub interval_secs: u64,
    pub services: BTreeMap<String, ServiceStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub address: String,
    pub enabled: bool,
}

/// A stage error caught at the cycle boundary.
struct StageFailure {
    stage: Stage,
    address: String,
    elapsed: Duration,
    error: CncFlowError,
}

// ---------------------------------------------------------------------------
// PipelineController
// ---------------------------------------------------------------------------

/// Owns the cycle state and runs scan cycles, one at a time.
pub struct PipelineController {
    source_path: PathBuf,
    interval: Duration,
    endpoints: Vec<ServiceEndpoint>,
    detector: ChangeDetector,
    invoker: ServiceInvoker,
    reporter: Arc<dyn CycleReporter>,
    state: Mutex<CycleState>,
    /// Single permit held for the whole duration of a cycle.
    cycle_slot: Semaphore,
}

impl PipelineController {
    /// Build a controller from the loaded application config.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let endpoints = ServiceEndpoint::all_from_config(&config.services)?;
        Self::with_parts(
            PathBuf::from(&config.watch.source_path),
            Duration::from_secs(config.watch.interval_secs),
            endpoints,
            ChangeDetector::from_config(&config.watch),
            ServiceInvoker::new()?,
        )
    }

    /// Build a controller from explicit parts. Exactly one endpoint per
    /// stage is required; they are run in stage order regardless of the
    /// order given.
    pub fn with_parts(
        source_path: PathBuf,
        interval: Duration,
        mut endpoints: Vec<ServiceEndpoint>,
        detector: ChangeDetector,
        invoker: ServiceInvoker,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(CncFlowError::config("interval must be greater than zero"));
        }
        endpoints.sort_by_key(|e| e.stage);
        let stages: Vec<Stage> = endpoints.iter().map(|e| e.stage).collect();
        if stages != Stage::ALL {
            return Err(CncFlowError::config(format!(
                "expected one endpoint per stage {:?}, got {stages:?}",
                Stage::ALL
            )));
        }

        Ok(Self {
            source_path,
            interval,
            endpoints,
            detector,
            invoker,
            reporter: Arc::new(SilentReporter),
            state: Mutex::new(CycleState::default()),
            cycle_slot: Semaphore::new(1),
        })
    }

    /// Replace the progress reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn CycleReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle, waiting for any cycle in flight to finish first.
    pub async fn run_cycle(&self, trigger: Trigger) -> CycleReport {
        let _permit = self.cycle_slot.acquire().await.expect("semaphore closed");
        self.execute(trigger).await
    }

    /// Run one cycle unless another is in flight, in which case `None`.
    pub async fn try_run_cycle(&self, trigger: Trigger) -> Option<CycleReport> {
        let _permit = self.cycle_slot.try_acquire().ok()?;
        Some(self.execute(trigger).await)
    }

    pub fn is_cycle_in_progress(&self) -> bool {
        self.cycle_slot.available_permits() == 0
    }

    /// Wait until the cycle in flight, if any, has finished.
    pub async fn wait_idle(&self) {
        drop(self.cycle_slot.acquire().await.expect("semaphore closed"));
    }

    /// Current status. Has no side effects.
    pub async fn status(&self) -> StatusSnapshot {
        let state = self.state.lock().await.clone();
        let services = self
            .endpoints
            .iter()
            .map(|e| {
                (
                    e.stage.to_string(),
                    ServiceStatus {
                        address: e.address.clone(),
                        enabled: e.enabled,
                    },
                )
            })
            .collect();

        StatusSnapshot {
            running: state.running,
            cycle_in_progress: self.is_cycle_in_progress(),
            last_scan_time: state.last_successful_scan,
            interval_secs: self.interval.as_secs(),
            services,
        }
    }

    pub(crate) async fn set_running(&self, running: bool) {
        self.state.lock().await.running = running;
    }

    // -----------------------------------------------------------------------
    // Cycle
    // -----------------------------------------------------------------------

    /// The cycle itself. Callers must hold the cycle permit.
    #[instrument(skip_all, fields(trigger = %trigger))]
    async fn execute(&self, trigger: Trigger) -> CycleReport {
        let cycle_id = CycleId::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        let since = self.state.lock().await.last_successful_scan;

        info!(%cycle_id, source = %self.source_path.display(), "starting scan cycle");

        let mut stages = Vec::with_capacity(self.endpoints.len());
        let outcome = if self.detector.has_new_work(&self.source_path, since).await {
            info!(%cycle_id, "new files detected, starting processing pipeline");
            match self.run_stages(&mut stages).await {
                Ok(()) => CycleOutcome::Completed,
                Err(failure) => {
                    error!(
                        %cycle_id,
                        stage = %failure.stage,
                        address = %failure.address,
                        elapsed_ms = failure.elapsed.as_millis() as u64,
                        kind = ?failure.error.invoke_kind(),
                        error = %failure.error,
                        "scan cycle error"
                    );
                    CycleOutcome::Aborted {
                        stage: failure.stage,
                        error: failure.error.to_string(),
                    }
                }
            }
        } else {
            CycleOutcome::NoNewWork
        };

        self.state.lock().await.last_successful_scan = Some(started_at);

        let report = CycleReport {
            cycle_id,
            trigger,
            started_at,
            duration: clock.elapsed(),
            outcome,
            stages,
        };
        report.log_summary();
        self.reporter.cycle_finished(&report);
        report
    }

    /// Run every stage in order, stopping at the first error.
    async fn run_stages(
        &self,
        results: &mut Vec<StageResult>,
    ) -> std::result::Result<(), StageFailure> {
        for endpoint in &self.endpoints {
            let stage = endpoint.stage;

            if !endpoint.enabled {
                info!(%stage, "stage disabled, skipping");
                let result = StageResult {
                    stage,
                    outcome: StageOutcome::Skipped,
                    message: None,
                    duration: Duration::ZERO,
                };
                self.reporter.stage_finished(&result);
                results.push(result);
                continue;
            }

            info!(%stage, address = %endpoint.address, "triggering stage");
            self.reporter.stage_started(stage);
            let clock = Instant::now();

            match self.invoker.invoke(endpoint, stage.path()).await {
                Ok(response) => {
                    let result = StageResult {
                        stage,
                        outcome: StageOutcome::Success,
                        message: response.and_then(|r| r.message),
                        duration: clock.elapsed(),
                    };
                    self.reporter.stage_finished(&result);
                    results.push(result);
                }
                Err(error) => {
                    let elapsed = clock.elapsed();
                    let result = StageResult {
                        stage,
                        outcome: StageOutcome::Failed,
                        message: Some(error.to_string()),
                        duration: elapsed,
                    };
                    self.reporter.stage_finished(&result);
                    results.push(result);
                    return Err(StageFailure {
                        stage,
                        address: endpoint.address.clone(),
                        elapsed,
                        error,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use std::time::SystemTime;

    use filetime::FileTime;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    /// One mock service per stage.
    pub(crate) struct Services {
        pub primary: MockServer,
        pub analysis: MockServer,
        pub tools: MockServer,
    }

    impl Services {
        pub(crate) async fn start() -> Self {
            Self {
                primary: MockServer::start().await,
                analysis: MockServer::start().await,
                tools: MockServer::start().await,
            }
        }

        pub(crate) fn endpoints(&self, enabled: [bool; 3]) -> Vec<ServiceEndpoint> {
            let servers = [&self.primary, &self.analysis, &self.tools];
            Stage::ALL
                .iter()
                .zip(servers)
                .zip(enabled)
                .map(|((&stage, server), on)| {
                    ServiceEndpoint::new(stage, server.uri(), on, Duration::from_secs(5)).unwrap()
                })
                .collect()
        }
    }

    pub(crate) async fn mount_ok(server: &MockServer, route: &str, message: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "message": message })),
            )
            .expect(times)
            .mount(server)
            .await;
    }

    pub(crate) fn controller(source: &Path, endpoints: Vec<ServiceEndpoint>) -> PipelineController {
        PipelineController::with_parts(
            source.to_path_buf(),
            Duration::from_secs(3600),
            endpoints,
            ChangeDetector::new(".json", 32, 10_000),
            ServiceInvoker::new().unwrap(),
        )
        .unwrap()
    }

    pub(crate) fn write_data_file(dir: &Path, name: &str, hours_ago: u64) {
        let file = dir.join(name);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, "{}").unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(hours_ago * 3600);
        filetime::set_file_mtime(&file, FileTime::from_system_time(mtime)).unwrap();
    }

    fn outcomes(report: &CycleReport) -> Vec<(Stage, StageOutcome)> {
        report.stages.iter().map(|s| (s.stage, s.outcome)).collect()
    }

    #[derive(Default)]
    struct RecordingReporter {
        events: StdMutex<Vec<String>>,
    }

    impl CycleReporter for RecordingReporter {
        fn stage_started(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("start {stage}"));
        }
        fn stage_finished(&self, result: &StageResult) {
            self.events
                .lock()
                .unwrap()
                .push(format!("finish {} {:?}", result.stage, result.outcome));
        }
        fn cycle_finished(&self, _report: &CycleReport) {
            self.events.lock().unwrap().push("done".into());
        }
    }

    #[tokio::test]
    async fn new_file_runs_all_three_stages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_data_file(dir.path(), "W5246NS01007/A/W5246NS01007A1.json", 0);

        let services = Services::start().await;
        mount_ok(&services.primary, "/api/scan", "scanned 1 file", 1).await;
        mount_ok(&services.analysis, "/api/analyze", "analysed 1 project", 1).await;
        mount_ok(&services.tools, "/api/scan", "tools updated", 1).await;

        let ctl = controller(dir.path(), services.endpoints([true; 3]));
        let report = ctl.run_cycle(Trigger::Manual).await;

        assert_eq!(report.outcome, CycleOutcome::Completed);
        assert_eq!(
            outcomes(&report),
            [
                (Stage::PrimaryScan, StageOutcome::Success),
                (Stage::Analysis, StageOutcome::Success),
                (Stage::ToolScan, StageOutcome::Success),
            ]
        );
        assert_eq!(report.stages[1].message.as_deref(), Some("analysed 1 project"));
        assert_eq!(report.invoked_stages(), 3);
    }

    #[tokio::test]
    async fn unchanged_tree_second_cycle_only_detects() {
        let dir = tempfile::tempdir().unwrap();
        write_data_file(dir.path(), "project.json", 2);

        let services = Services::start().await;
        // Exactly one call per service across both cycles.
        mount_ok(&services.primary, "/api/scan", "ok", 1).await;
        mount_ok(&services.analysis, "/api/analyze", "ok", 1).await;
        mount_ok(&services.tools, "/api/scan", "ok", 1).await;

        let ctl = controller(dir.path(), services.endpoints([true; 3]));

        let first = ctl.run_cycle(Trigger::Timer).await;
        assert_eq!(first.outcome, CycleOutcome::Completed);

        let second = ctl.run_cycle(Trigger::Timer).await;
        assert_eq!(second.outcome, CycleOutcome::NoNewWork);
        assert!(second.stages.is_empty());
        assert!(second.started_at >= first.started_at);

        let status = ctl.status().await;
        assert_eq!(status.last_scan_time, Some(second.started_at));
    }

    #[tokio::test]
    async fn failing_stage_stops_later_stages() {
        let dir = tempfile::tempdir().unwrap();
        write_data_file(dir.path(), "a.json", 0);

        let services = Services::start().await;
        mount_ok(&services.primary, "/api/scan", "ok", 1).await;
        Mock::given(method("POST"))
            .and(path("/api/analyze"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&services.analysis)
            .await;
        mount_ok(&services.tools, "/api/scan", "never", 0).await;

        let ctl = controller(dir.path(), services.endpoints([true; 3]));
        let report = ctl.run_cycle(Trigger::Timer).await;

        match &report.outcome {
            CycleOutcome::Aborted { stage, error } => {
                assert_eq!(*stage, Stage::Analysis);
                assert!(error.contains("503"));
            }
            other => panic!("expected Aborted, got {other:?}"),
        }
        assert_eq!(
            outcomes(&report),
            [
                (Stage::PrimaryScan, StageOutcome::Success),
                (Stage::Analysis, StageOutcome::Failed),
            ]
        );
        // The scan time advances even when the cycle ends early.
        assert_eq!(ctl.status().await.last_scan_time, Some(report.started_at));
    }

    #[tokio::test]
    async fn unreachable_first_stage_aborts_cycle() {
        let dir = tempfile::tempdir().unwrap();
        write_data_file(dir.path(), "a.json", 0);

        let services = Services::start().await;
        mount_ok(&services.analysis, "/api/analyze", "never", 0).await;
        mount_ok(&services.tools, "/api/scan", "never", 0).await;

        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut endpoints = services.endpoints([true; 3]);
        endpoints[0] = ServiceEndpoint::new(
            Stage::PrimaryScan,
            format!("http://127.0.0.1:{port}"),
            true,
            Duration::from_secs(5),
        )
        .unwrap();

        let ctl = controller(dir.path(), endpoints);
        let report = ctl.run_cycle(Trigger::Manual).await;

        assert!(matches!(
            report.outcome,
            CycleOutcome::Aborted {
                stage: Stage::PrimaryScan,
                ..
            }
        ));
        assert_eq!(report.stages.len(), 1);
    }

    #[tokio::test]
    async fn disabled_stage_is_skipped_without_a_call() {
        let dir = tempfile::tempdir().unwrap();
        write_data_file(dir.path(), "a.json", 0);

        let services = Services::start().await;
        mount_ok(&services.primary, "/api/scan", "ok", 1).await;
        mount_ok(&services.analysis, "/api/analyze", "never", 0).await;
        mount_ok(&services.tools, "/api/scan", "ok", 1).await;

        let reporter = Arc::new(RecordingReporter::default());
        let ctl = controller(dir.path(), services.endpoints([true, false, true]))
            .with_reporter(reporter.clone());
        let report = ctl.run_cycle(Trigger::Manual).await;

        assert_eq!(report.outcome, CycleOutcome::Completed);
        assert_eq!(
            outcomes(&report),
            [
                (Stage::PrimaryScan, StageOutcome::Success),
                (Stage::Analysis, StageOutcome::Skipped),
                (Stage::ToolScan, StageOutcome::Success),
            ]
        );
        assert_eq!(report.invoked_stages(), 2);

        let events = reporter.events.lock().unwrap().clone();
        assert_eq!(
            events,
            [
                "start primary-scan",
                "finish primary-scan Success",
                "finish analysis Skipped",
                "start tool-scan",
                "finish tool-scan Success",
                "done",
            ]
        );
    }

    #[tokio::test]
    async fn missing_source_path_runs_no_stages() {
        let dir = tempfile::tempdir().unwrap();
        let services = Services::start().await;
        mount_ok(&services.primary, "/api/scan", "never", 0).await;

        let ctl = controller(&dir.path().join("not-there"), services.endpoints([true; 3]));
        let report = ctl.run_cycle(Trigger::Manual).await;

        assert_eq!(report.outcome, CycleOutcome::NoNewWork);
        assert_eq!(ctl.status().await.last_scan_time, Some(report.started_at));
    }

    #[tokio::test]
    async fn overlapping_attempt_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_data_file(dir.path(), "a.json", 0);

        let services = Services::start().await;
        Mock::given(method("POST"))
            .and(path("/api/scan"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({}))
                    .set_delay(Duration::from_millis(800)),
            )
            .expect(1)
            .mount(&services.primary)
            .await;
        mount_ok(&services.analysis, "/api/analyze", "ok", 1).await;
        mount_ok(&services.tools, "/api/scan", "ok", 1).await;

        let ctl = Arc::new(controller(dir.path(), services.endpoints([true; 3])));
        let running = {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move { ctl.run_cycle(Trigger::Manual).await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(ctl.is_cycle_in_progress());
        assert!(ctl.status().await.cycle_in_progress);
        assert!(ctl.try_run_cycle(Trigger::Timer).await.is_none());

        let report = running.await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::Completed);
        assert!(!ctl.is_cycle_in_progress());
    }

    #[tokio::test]
    async fn status_reports_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let services = Services::start().await;
        let ctl = controller(dir.path(), services.endpoints([true, true, false]));

        let status = ctl.status().await;
        assert!(!status.running);
        assert!(!status.cycle_in_progress);
        assert!(status.last_scan_time.is_none());
        assert_eq!(status.interval_secs, 3600);
        assert_eq!(status.services.len(), 3);
        assert!(!status.services["tool-scan"].enabled);
        assert_eq!(status.services["analysis"].address, services.analysis.uri());

        let json = serde_json::to_value(&status).unwrap();
        assert!(json["last_scan_time"].is_null());
    }

    #[test]
    fn with_parts_requires_every_stage() {
        let endpoint = ServiceEndpoint::new(
            Stage::Analysis,
            "http://localhost:3005",
            true,
            Duration::from_secs(1),
        )
        .unwrap();
        let err = PipelineController::with_parts(
            PathBuf::from("."),
            Duration::from_secs(60),
            vec![endpoint],
            ChangeDetector::new(".json", 32, 100),
            ServiceInvoker::new().unwrap(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("one endpoint per stage"));
    }
}
