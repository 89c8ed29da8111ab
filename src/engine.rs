use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::EffectiveConfig;
use crate::core::{ScanSession, ScanStatus, ScanType};
use crate::registry::ScanRegistry;
use crate::report::{FileReportRenderer, ReportRenderer};
use crate::scanlog::{LocalFileSink, RemoteSink, ScanLogRecord, ScanLogSink, SinkKind};
use crate::scanners::{ProcessInvoker, ScannerInvoker};
use crate::{rules, scoring};

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// When set, report and scan-log failures are recorded on the session
    /// instead of failing it.
    pub isolate_collaborator_failures: bool,
    pub registry_ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub scan_type: String,
    pub target: String,
    pub requester: String,
}

#[derive(Clone)]
pub struct Engine {
    opts: EngineOptions,
    invoker: Arc<dyn ScannerInvoker>,
    renderer: Arc<dyn ReportRenderer>,
    scan_log: Arc<dyn ScanLogSink>,
    registry: ScanRegistry,
}

impl Engine {
    pub fn new(
        opts: EngineOptions,
        invoker: Arc<dyn ScannerInvoker>,
        renderer: Arc<dyn ReportRenderer>,
        scan_log: Arc<dyn ScanLogSink>,
    ) -> Self {
        let registry = ScanRegistry::new(opts.registry_ttl);
        Self {
            opts,
            invoker,
            renderer,
            scan_log,
            registry,
        }
    }

    /// Wires the process-backed scanners and file/remote collaborators
    /// described by `cfg`.
    pub fn from_config(cfg: &EffectiveConfig) -> Result<Self> {
        let invoker = ProcessInvoker::new(cfg.scanners.timeouts());
        let renderer = FileReportRenderer::new(&cfg.report.dir, cfg.report.format);

        let local = LocalFileSink::new(&cfg.scanlog.local_path);
        let scan_log: Arc<dyn ScanLogSink> = match (cfg.scanlog.sink, &cfg.scanlog.remote_url) {
            (SinkKind::Remote, Some(url)) => Arc::new(RemoteSink::new(
                url.as_str(),
                Duration::from_secs(cfg.scanlog.remote_timeout_secs),
                local,
            )?),
            _ => Arc::new(local),
        };

        Ok(Self::new(
            EngineOptions {
                isolate_collaborator_failures: cfg.engine.isolate_collaborator_failures,
                registry_ttl: cfg.engine.registry_ttl_secs.map(Duration::from_secs),
            },
            Arc::new(invoker),
            Arc::new(renderer),
            scan_log,
        ))
    }

    pub fn registry(&self) -> &ScanRegistry {
        &self.registry
    }

    /// Registers a running session and starts it on a background thread.
    /// Returns the scan id without waiting for any scanner.
    pub fn submit(&self, req: ScanRequest) -> Result<String> {
        let target = req.target.trim();
        if target.is_empty() {
            return Err(crate::exit::invalid_args("ターゲット(URL/IP)が必要です"));
        }
        if target.chars().any(char::is_control) {
            return Err(crate::exit::invalid_args(
                "ターゲットに制御文字(改行など)は使用できません",
            ));
        }
        if req.requester.chars().any(char::is_control) {
            return Err(crate::exit::invalid_args(
                "依頼者に制御文字(改行など)は使用できません",
            ));
        }

        let id = new_scan_id();
        let mut session = ScanSession::new(
            id.clone(),
            now_rfc3339(),
            target,
            req.scan_type,
            req.requester,
        );
        session.status = ScanStatus::Running;
        self.registry.insert(session.clone());
        info!(scan_id = %id, target, scan_type = %session.scan_type, "スキャンを受け付けました");

        let engine = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("scan-{id}"))
            .spawn(move || engine.execute(session));
        if let Err(err) = spawned {
            let mut failed = self.registry.get(&id).unwrap_or_else(|| {
                ScanSession::new(id.clone(), now_rfc3339(), target, "", "")
            });
            failed.status = ScanStatus::Failed;
            failed.error = Some(format!("スキャンスレッドの起動に失敗しました: {err}"));
            self.registry.update(&failed);
            return Err(err).context("スキャンスレッドの起動に失敗しました");
        }

        Ok(id)
    }

    pub fn status(&self, scan_id: &str) -> Option<ScanSession> {
        self.registry.get(scan_id)
    }

    /// Path of the generated report, only once the scan completed and the
    /// file is actually there.
    pub fn report(&self, scan_id: &str) -> Option<PathBuf> {
        let session = self.registry.get(scan_id)?;
        if session.status != ScanStatus::Completed {
            return None;
        }
        let path = PathBuf::from(session.report_path?);
        path.exists().then_some(path)
    }

    /// Polls until the session reaches a terminal status. `None` when the id
    /// is unknown or the entry disappeared.
    pub fn wait(&self, scan_id: &str, poll_interval: Duration) -> Option<ScanSession> {
        self.wait_with(scan_id, poll_interval, |_| {})
    }

    /// Like [`Engine::wait`], handing every non-terminal snapshot to
    /// `on_poll` before sleeping.
    pub fn wait_with(
        &self,
        scan_id: &str,
        poll_interval: Duration,
        mut on_poll: impl FnMut(&ScanSession),
    ) -> Option<ScanSession> {
        loop {
            let session = self.registry.get(scan_id)?;
            if session.status.is_terminal() {
                return Some(session);
            }
            on_poll(&session);
            thread::sleep(poll_interval);
        }
    }

    /// Runs every step of a session on the current thread and stores the
    /// terminal snapshot in the registry.
    pub fn execute(&self, mut session: ScanSession) -> ScanSession {
        let span = info_span!("scan", scan_id = %session.id);
        let _guard = span.enter();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_steps(&mut session)));
        match outcome {
            Ok(Ok(())) => {
                session.status = ScanStatus::Completed;
                info!(stage = %session.vuln_stage, findings = session.findings.len(), "スキャンが完了しました");
            }
            Ok(Err(err)) => {
                session.status = ScanStatus::Failed;
                session.error = Some(format!("{err:#}"));
                error!(error = %format!("{err:#}"), "スキャンが失敗しました");
            }
            Err(payload) => {
                session.status = ScanStatus::Failed;
                session.error = Some(format!("内部エラー: {}", panic_message(&payload)));
                error!("スキャン処理中にパニックが発生しました");
            }
        }

        self.registry.update(&session);
        session
    }

    fn run_steps(&self, session: &mut ScanSession) -> Result<()> {
        let scan_type = ScanType::parse(&session.scan_type);
        if let ScanType::Unrecognized(raw) = &scan_type {
            debug!(scan_type = %raw, "未知のスキャン種別のため実行するスキャナはありません");
        }

        for kind in scan_type.scanners() {
            let result = self.invoker.invoke(kind, &session.target);
            if !result.success {
                warn!(scanner = %kind, error = result.error.as_deref().unwrap_or(""), "スキャナが失敗しました");
            }
            session.results.insert(kind, result);
            self.registry.update(session);
        }

        session.findings = rules::extract_findings(&session.results);
        session.vuln_stage = scoring::determine_vuln_stage(&session.findings);
        self.registry.update(session);

        match self.renderer.render(session) {
            Ok(path) => {
                info!(path = %path.display(), "レポートを生成しました");
                session.report_path = Some(path.display().to_string());
            }
            Err(err) => {
                self.collaborator_failure(session, err.context("レポート生成に失敗しました"))?
            }
        }

        let record = ScanLogRecord::from_session(session);
        if let Err(err) = self.scan_log.record(&record) {
            self.collaborator_failure(session, err.context("スキャンログの記録に失敗しました"))?;
        }

        Ok(())
    }

    fn collaborator_failure(&self, session: &mut ScanSession, err: anyhow::Error) -> Result<()> {
        if !self.opts.isolate_collaborator_failures {
            return Err(err);
        }
        let message = format!("{err:#}");
        warn!(error = %message, "後続処理の失敗を記録して続行します");
        session.collaborator_errors.push(message);
        Ok(())
    }
}

fn new_scan_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "不明なパニック".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ScannerKind, ScannerResult, Severity, VulnStage};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeInvoker {
        results: HashMap<ScannerKind, ScannerResult>,
        calls: Mutex<Vec<ScannerKind>>,
        panic_on: Option<ScannerKind>,
        delay: Duration,
    }

    impl ScannerInvoker for FakeInvoker {
        fn invoke(&self, kind: ScannerKind, _target: &str) -> ScannerResult {
            self.calls.lock().expect("lock").push(kind);
            std::thread::sleep(self.delay);
            if self.panic_on == Some(kind) {
                panic!("scanner exploded");
            }
            self.results
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| ScannerResult::failed(format!("{kind}: not installed")))
        }
    }

    struct FakeRenderer {
        fail: bool,
        dir: PathBuf,
        calls: AtomicUsize,
    }

    impl FakeRenderer {
        fn new(fail: bool) -> Self {
            static SEQ: AtomicU64 = AtomicU64::new(0);
            let seq = SEQ.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!(
                "webscan-engine-test-{}-{seq}",
                std::process::id()
            ));
            Self {
                fail,
                dir,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Drop for FakeRenderer {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    impl ReportRenderer for FakeRenderer {
        fn render(&self, session: &ScanSession) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(anyhow::anyhow!("disk full"));
            }
            std::fs::create_dir_all(&self.dir)?;
            let path = self.dir.join(format!("{}.md", session.id));
            std::fs::write(&path, b"report")?;
            Ok(path)
        }
    }

    #[derive(Default)]
    struct FakeSink {
        fail: bool,
        records: Mutex<Vec<ScanLogRecord>>,
    }

    impl ScanLogSink for FakeSink {
        fn record(&self, record: &ScanLogRecord) -> Result<()> {
            if self.fail {
                return Err(anyhow::anyhow!("sheet unavailable"));
            }
            self.records.lock().expect("lock").push(record.clone());
            Ok(())
        }
    }

    struct Harness {
        engine: Engine,
        invoker: Arc<FakeInvoker>,
        renderer: Arc<FakeRenderer>,
        sink: Arc<FakeSink>,
    }

    fn harness(invoker: FakeInvoker, renderer: FakeRenderer, sink: FakeSink, isolate: bool) -> Harness {
        let invoker = Arc::new(invoker);
        let renderer = Arc::new(renderer);
        let sink = Arc::new(sink);
        let engine = Engine::new(
            EngineOptions {
                isolate_collaborator_failures: isolate,
                registry_ttl: None,
            },
            invoker.clone(),
            renderer.clone(),
            sink.clone(),
        );
        Harness {
            engine,
            invoker,
            renderer,
            sink,
        }
    }

    fn request(scan_type: &str) -> ScanRequest {
        ScanRequest {
            scan_type: scan_type.to_string(),
            target: "example.com".to_string(),
            requester: "tester".to_string(),
        }
    }

    fn run(h: &Harness, scan_type: &str) -> ScanSession {
        let id = h.engine.submit(request(scan_type)).expect("submit");
        h.engine
            .wait(&id, Duration::from_millis(5))
            .expect("session present")
    }

    fn noisy_invoker() -> FakeInvoker {
        let mut results = HashMap::new();
        results.insert(
            ScannerKind::Nmap,
            ScannerResult::succeeded("443/tcp open https\n| ssl-heartbleed: VULNERABLE\n"),
        );
        results.insert(
            ScannerKind::Nikto,
            ScannerResult::succeeded("+ a\n+ b\n+ c\n+ d\n+ e\n+ f\n"),
        );
        results.insert(
            ScannerKind::Whatweb,
            ScannerResult::succeeded("nginx[1.25]"),
        );
        results.insert(
            ScannerKind::Curl,
            ScannerResult::succeeded("HTTP/1.1 200 OK\r\n").with_security_analysis(
                crate::headers::analyze_security_headers("HTTP/1.1 200 OK\r\n"),
            ),
        );
        FakeInvoker {
            results,
            ..FakeInvoker::default()
        }
    }

    #[test]
    fn full_scan_extracts_and_scores_in_order() {
        let h = harness(noisy_invoker(), FakeRenderer::new(false), FakeSink::default(), false);
        let s = run(&h, "all");

        assert_eq!(s.status, ScanStatus::Completed);
        assert_eq!(
            *h.invoker.calls.lock().expect("lock"),
            ScannerKind::ALL.to_vec()
        );
        let severities: Vec<Severity> = s.findings.iter().map(|f| f.severity).collect();
        assert_eq!(severities, vec![Severity::High, Severity::High, Severity::High]);
        assert_eq!(s.vuln_stage, VulnStage::Critical);
        assert!(s.report_path.is_some());
        assert!(h.engine.report(&s.id).is_some());

        let records = h.sink.records.lock().expect("lock");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].vuln_stage, VulnStage::Critical);
        assert_eq!(records[0].requester, "tester");
    }

    #[test]
    fn unknown_scan_type_completes_empty() {
        let h = harness(noisy_invoker(), FakeRenderer::new(false), FakeSink::default(), false);
        let s = run(&h, "42");

        assert_eq!(s.status, ScanStatus::Completed);
        assert!(s.results.is_empty());
        assert!(s.findings.is_empty());
        assert_eq!(s.vuln_stage, VulnStage::Default);
        assert!(h.invoker.calls.lock().expect("lock").is_empty());
        assert_eq!(h.renderer.calls.load(Ordering::Relaxed), 1);
        assert_eq!(h.sink.records.lock().expect("lock").len(), 1);
    }

    #[test]
    fn single_scanner_type_runs_one_tool() {
        let h = harness(noisy_invoker(), FakeRenderer::new(false), FakeSink::default(), false);
        let s = run(&h, "3");

        assert_eq!(*h.invoker.calls.lock().expect("lock"), vec![ScannerKind::Nikto]);
        assert_eq!(s.results.len(), 1);
        assert_eq!(s.findings.len(), 1);
        assert_eq!(s.findings[0].severity, Severity::High);
        assert_eq!(s.vuln_stage, VulnStage::Medium);
    }

    #[test]
    fn scanner_failures_are_soft() {
        let h = harness(
            FakeInvoker::default(),
            FakeRenderer::new(false),
            FakeSink::default(),
            false,
        );
        let s = run(&h, "all");

        assert_eq!(s.status, ScanStatus::Completed);
        assert_eq!(s.results.len(), 4);
        assert!(s.results.values().all(|r| !r.success && r.error.is_some()));
        assert_eq!(s.vuln_stage, VulnStage::Default);
    }

    #[test]
    fn coupled_report_failure_fails_the_session() {
        let h = harness(noisy_invoker(), FakeRenderer::new(true), FakeSink::default(), false);
        let s = run(&h, "all");

        assert_eq!(s.status, ScanStatus::Failed);
        let err = s.error.as_deref().expect("error message");
        assert!(err.contains("レポート生成に失敗しました"), "err={err}");
        assert!(err.contains("disk full"), "err={err}");
        assert!(h.sink.records.lock().expect("lock").is_empty());
        assert!(h.engine.report(&s.id).is_none());
    }

    #[test]
    fn coupled_log_failure_fails_the_session() {
        let sink = FakeSink {
            fail: true,
            ..FakeSink::default()
        };
        let h = harness(noisy_invoker(), FakeRenderer::new(false), sink, false);
        let s = run(&h, "2");

        assert_eq!(s.status, ScanStatus::Failed);
        assert!(
            s.error
                .as_deref()
                .is_some_and(|e| e.contains("sheet unavailable"))
        );
        assert!(h.engine.report(&s.id).is_none());
    }

    #[test]
    fn isolated_collaborator_failures_keep_results() {
        let sink = FakeSink {
            fail: true,
            ..FakeSink::default()
        };
        let h = harness(noisy_invoker(), FakeRenderer::new(true), sink, true);
        let s = run(&h, "all");

        assert_eq!(s.status, ScanStatus::Completed);
        assert_eq!(s.vuln_stage, VulnStage::Critical);
        assert_eq!(s.collaborator_errors.len(), 2);
        assert!(s.error.is_none());
        assert!(s.report_path.is_none());
    }

    #[test]
    fn panic_in_a_step_marks_failed() {
        let invoker = FakeInvoker {
            panic_on: Some(ScannerKind::Nikto),
            ..noisy_invoker()
        };
        let h = harness(invoker, FakeRenderer::new(false), FakeSink::default(), false);
        let s = run(&h, "all");

        assert_eq!(s.status, ScanStatus::Failed);
        assert!(
            s.error
                .as_deref()
                .is_some_and(|e| e.contains("scanner exploded"))
        );
        assert!(s.results.contains_key(&ScannerKind::Nmap));
    }

    #[test]
    fn empty_target_is_rejected_before_starting() {
        let h = harness(noisy_invoker(), FakeRenderer::new(false), FakeSink::default(), false);
        let err = h
            .engine
            .submit(ScanRequest {
                target: "   ".to_string(),
                ..request("all")
            })
            .expect_err("empty target");
        assert_eq!(crate::exit::exit_code(&err), 2);
        assert!(h.engine.registry().is_empty());
    }

    #[test]
    fn control_characters_in_target_or_requester_are_rejected() {
        let h = harness(noisy_invoker(), FakeRenderer::new(false), FakeSink::default(), false);
        for (target, requester) in [
            ("example.com\n2026-01-01T00:00:00Z,mallory,all,forged", "tester"),
            ("exam\tple.com", "tester"),
            ("example.com", "alice\nbob"),
        ] {
            let err = h
                .engine
                .submit(ScanRequest {
                    target: target.to_string(),
                    requester: requester.to_string(),
                    ..request("all")
                })
                .expect_err("control characters");
            assert_eq!(crate::exit::exit_code(&err), 2, "target={target:?}");
        }
        assert!(h.engine.registry().is_empty());
    }

    #[test]
    fn wait_with_reports_progress_until_terminal() {
        let invoker = FakeInvoker {
            delay: Duration::from_millis(30),
            ..noisy_invoker()
        };
        let h = harness(invoker, FakeRenderer::new(false), FakeSink::default(), false);
        let id = h.engine.submit(request("all")).expect("submit");

        let mut seen = Vec::new();
        let s = h
            .engine
            .wait_with(&id, Duration::from_millis(5), |snap| {
                seen.push((snap.status, snap.results.len()))
            })
            .expect("session present");

        assert_eq!(s.status, ScanStatus::Completed);
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|(status, _)| *status == ScanStatus::Running));
        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn unknown_id_has_no_status_or_report() {
        let h = harness(noisy_invoker(), FakeRenderer::new(false), FakeSink::default(), false);
        assert!(h.engine.status("nope").is_none());
        assert!(h.engine.report("nope").is_none());
        assert!(h.engine.wait("nope", Duration::from_millis(1)).is_none());
    }

    #[test]
    fn concurrent_scans_do_not_interfere() {
        let h = harness(noisy_invoker(), FakeRenderer::new(false), FakeSink::default(), false);
        let ids: Vec<String> = ["all", "2", "3", "4", "5", "zzz"]
            .iter()
            .map(|t| h.engine.submit(request(t)).expect("submit"))
            .collect();
        for id in &ids {
            let s = h
                .engine
                .wait(id, Duration::from_millis(5))
                .expect("present");
            assert_eq!(s.status, ScanStatus::Completed, "id={id}");
        }
        assert_eq!(h.engine.registry().len(), ids.len());
        assert_eq!(h.sink.records.lock().expect("lock").len(), ids.len());
    }
}
