//! Recording mock providers shared by the integration tests.
//!
//! Every mock writes an event such as `R.prepare` or `session.complete` into a
//! shared [`Recorder`], so tests can assert on call order and call counts.
//! Mock resources and processes are configured through their profiles:
//!
//! - `resource.<name>.transactional = true`
//! - `resource.<name>.fail = created,prepare,completing,close`
//! - `resource.<name>.failAbort = <session id>`
//! - `resource.<name>.panic = <hook>` (the hook panics instead of failing)
//! - `resource.<name>.delayMs = <millis>` (every hook sleeps this long)
//! - `resource.<name>.records = <count>` (records produced by its sources)
//! - `process.<type>.delayMs` / `process.<type>.fail = <process name>`

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use windgate_core::{
    DataModel, DrainDriver, DriverRepository, DriverScript, GateError, GateProfile, GateScript,
    ParameterList, PlainProcessProvider, ProcessProfile, ProcessProvider, ProcessScript,
    ProfileContext, Properties, ResourceMirror, ResourceProfile, ResourceProvider, Result,
    ServiceResolver, SessionFailure, SessionMirror, SessionProvider, SimulationSupport,
    SourceDriver,
};

pub const MOCK: &str = "mock";
pub const RECORDING: &str = "recording";

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    records: Mutex<Vec<DataModel>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Recorder {
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn position(&self, event: &str) -> usize {
        let events = self.events();
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event {} was not recorded: {:?}", event, events))
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.count(event) > 0
    }

    pub fn records(&self) -> Vec<DataModel> {
        self.records.lock().clone()
    }

    /// Highest number of callbacks observed running at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(self: &Arc<Self>) -> Active {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Active(self.clone())
    }
}

struct Active(Arc<Recorder>);

impl Drop for Active {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Session

pub struct MockSessionProvider {
    recorder: Arc<Recorder>,
    existing: Arc<Mutex<BTreeSet<String>>>,
}

impl MockSessionProvider {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            recorder,
            existing: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn add(&self, id: &str) {
        self.existing.lock().insert(id.to_string());
    }

    pub fn exists(&self, id: &str) -> bool {
        self.existing.lock().contains(id)
    }

    fn mirror(&self, id: &str) -> Box<dyn SessionMirror> {
        Box::new(MockSession {
            id: id.to_string(),
            recorder: self.recorder.clone(),
            existing: self.existing.clone(),
        })
    }
}

impl SimulationSupport for MockSessionProvider {}

#[async_trait]
impl SessionProvider for MockSessionProvider {
    async fn create(&self, id: &str) -> Result<Box<dyn SessionMirror>> {
        if !self.existing.lock().insert(id.to_string()) {
            return Err(GateError::session(id, SessionFailure::AlreadyExists));
        }
        self.recorder.record("session.create");
        Ok(self.mirror(id))
    }

    async fn open(&self, id: &str) -> Result<Box<dyn SessionMirror>> {
        if !self.exists(id) {
            return Err(GateError::session(id, SessionFailure::NotExist));
        }
        self.recorder.record("session.open");
        Ok(self.mirror(id))
    }

    async fn created_ids(&self) -> Result<Vec<String>> {
        Ok(self.existing.lock().iter().cloned().collect())
    }
}

struct MockSession {
    id: String,
    recorder: Arc<Recorder>,
    existing: Arc<Mutex<BTreeSet<String>>>,
}

#[async_trait]
impl SessionMirror for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&mut self) -> Result<()> {
        self.recorder.record("session.complete");
        self.existing.lock().remove(&self.id);
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        self.recorder.record(format!("session.abort({})", self.id));
        self.existing.lock().remove(&self.id);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.recorder.record("session.close");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resources

#[derive(Clone)]
struct ResourceSettings {
    name: String,
    transactional: bool,
    fail: HashSet<String>,
    fail_abort: Option<String>,
    panic: Option<String>,
    delay: Duration,
    records: usize,
}

impl ResourceSettings {
    fn from_profile(profile: &ResourceProfile) -> Self {
        let conf = profile.configuration();
        Self {
            name: profile.name().to_string(),
            transactional: conf.get("transactional").map(|v| v == "true").unwrap_or(false),
            fail: conf
                .get("fail")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            fail_abort: conf.get("failAbort").cloned(),
            panic: conf.get("panic").cloned(),
            delay: delay(conf),
            records: conf
                .get("records")
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        }
    }
}

pub struct MockResourceProvider {
    settings: ResourceSettings,
    recorder: Arc<Recorder>,
}

impl SimulationSupport for MockResourceProvider {}

#[async_trait]
impl ResourceProvider for MockResourceProvider {
    async fn create(
        &self,
        _session_id: &str,
        _arguments: &ParameterList,
    ) -> Result<Arc<dyn ResourceMirror>> {
        self.recorder.record(format!("{}.create", self.settings.name));
        Ok(Arc::new(MockMirror {
            settings: self.settings.clone(),
            recorder: self.recorder.clone(),
        }))
    }

    async fn abort(&self, session_id: &str) -> Result<()> {
        self.recorder
            .record(format!("{}.abort({})", self.settings.name, session_id));
        if self.settings.fail_abort.as_deref() == Some(session_id) {
            return Err(GateError::config(format!(
                "{} refused to abort {}",
                self.settings.name, session_id
            )));
        }
        Ok(())
    }
}

pub struct MockMirror {
    settings: ResourceSettings,
    recorder: Arc<Recorder>,
}

impl MockMirror {
    async fn hook(&self, hook: &str) -> Result<()> {
        let _active = self.recorder.enter();
        self.recorder.record(format!("{}.{}", self.settings.name, hook));
        if !self.settings.delay.is_zero() {
            tokio::time::sleep(self.settings.delay).await;
        }
        if self.settings.panic.as_deref() == Some(hook) {
            panic!("{} panicked in {}", self.settings.name, hook);
        }
        if self.settings.fail.contains(hook) {
            return Err(GateError::config(format!(
                "{} failed in {}",
                self.settings.name, hook
            )));
        }
        Ok(())
    }
}

impl SimulationSupport for MockMirror {}

#[async_trait]
impl ResourceMirror for MockMirror {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn is_transactional(&self) -> bool {
        self.settings.transactional
    }

    async fn on_session_created(&self) -> Result<()> {
        self.hook("created").await
    }

    async fn prepare(&self, _script: &GateScript) -> Result<()> {
        self.hook("prepare").await
    }

    async fn create_source(&self, _process: &ProcessScript) -> Result<Box<dyn SourceDriver>> {
        let records = (0..self.settings.records)
            .map(|i| serde_json::json!({ "resource": self.settings.name, "index": i }))
            .collect::<Vec<_>>();
        Ok(Box::new(MockSource {
            records: records.into_iter(),
        }))
    }

    async fn create_drain(&self, _process: &ProcessScript) -> Result<Box<dyn DrainDriver>> {
        Ok(Box::new(MockDrain {
            recorder: self.recorder.clone(),
        }))
    }

    async fn on_session_completing(&self) -> Result<()> {
        self.hook("completing").await
    }

    async fn close(&self) -> Result<()> {
        self.recorder.record(format!("{}.close", self.settings.name));
        if self.settings.fail.contains("close") {
            return Err(GateError::config("close failed"));
        }
        Ok(())
    }
}

struct MockSource {
    records: std::vec::IntoIter<DataModel>,
}

#[async_trait]
impl SourceDriver for MockSource {
    async fn next(&mut self) -> Result<Option<DataModel>> {
        Ok(self.records.next())
    }
}

struct MockDrain {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl DrainDriver for MockDrain {
    async fn put(&mut self, record: DataModel) -> Result<()> {
        self.recorder.records.lock().push(record);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Processes

/// Records each execution, then copies records like the plain provider.
pub struct RecordingProcessProvider {
    recorder: Arc<Recorder>,
    delay: Duration,
    fail: Option<String>,
}

impl SimulationSupport for RecordingProcessProvider {}

#[async_trait]
impl ProcessProvider for RecordingProcessProvider {
    async fn execute(&self, drivers: &DriverRepository, script: &ProcessScript) -> Result<()> {
        let _active = self.recorder.enter();
        self.recorder.record(format!("process.{}", script.name()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.as_deref() == Some(script.name()) {
            return Err(GateError::config(format!("{} failed", script.name())));
        }
        PlainProcessProvider::new().execute(drivers, script).await
    }
}

fn delay(conf: &BTreeMap<String, String>) -> Duration {
    conf.get("delayMs")
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO)
}

// ---------------------------------------------------------------------------
// Fixtures

pub struct Harness {
    pub recorder: Arc<Recorder>,
    pub sessions: Arc<MockSessionProvider>,
    pub context: ProfileContext,
}

impl Harness {
    pub fn new() -> Self {
        let recorder = Arc::new(Recorder::default());
        let sessions = Arc::new(MockSessionProvider::new(recorder.clone()));

        let session_provider = sessions.clone();
        let resource_recorder = recorder.clone();
        let process_recorder = recorder.clone();
        let resolver = ServiceResolver::with_builtins()
            .register_session(MOCK, move |_| {
                Ok(session_provider.clone() as Arc<dyn SessionProvider>)
            })
            .register_resource(MOCK, move |profile: &ResourceProfile| {
                Ok(Arc::new(MockResourceProvider {
                    settings: ResourceSettings::from_profile(profile),
                    recorder: resource_recorder.clone(),
                }) as Arc<dyn ResourceProvider>)
            })
            .register_process(RECORDING, move |profile: &ProcessProfile| {
                Ok(Arc::new(RecordingProcessProvider {
                    recorder: process_recorder.clone(),
                    delay: delay(profile.configuration()),
                    fail: profile.configuration().get("fail").cloned(),
                }) as Arc<dyn ProcessProvider>)
            })
            .register_data_class("record");

        Self {
            recorder,
            sessions,
            context: ProfileContext::new(Arc::new(resolver), ParameterList::new()),
        }
    }

    /// Profile with the mock session provider, a `recording` process type,
    /// and the given extra properties.
    pub fn profile(&self, pairs: &[(&str, &str)]) -> GateProfile {
        let mut properties: Properties = [("session", MOCK), ("process.recording", RECORDING)]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        properties.extend(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        GateProfile::load_from("testing", &properties, &self.context).unwrap()
    }
}

pub fn process(name: &str, source: &str, drain: &str) -> ProcessScript {
    ProcessScript::new(
        name,
        RECORDING,
        "record",
        DriverScript::new(source, BTreeMap::new()),
        DriverScript::new(drain, BTreeMap::new()),
    )
}

pub fn script(processes: Vec<ProcessScript>) -> GateScript {
    GateScript::new("testing", processes)
}
