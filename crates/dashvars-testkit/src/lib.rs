//! Test doubles for the host services of a [`VariableSrv`] plus a few
//! variable fixtures.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dashvars_common::{TimeRange, VariableError, VariableErrorKind};
use dashvars_engine::variable::{CustomVariable, QueryVariable};
use dashvars_engine::{
    DashboardEvent, DatasourceInstance, DatasourceProvider, MemoryUrlStore, MetricFindOptions,
    MetricFindSource, MetricFindValue, Refresh, Services, TemplatingConfig, TimeSource, Variable,
    VariableKind, VariableSrv,
};
use futures::channel::{mpsc, oneshot};
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;

/// One metric-find call as seen by a [`MockSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub query: String,
    pub options: MetricFindOptions,
}

type Responder = Box<dyn Fn(&str) -> Vec<MetricFindValue> + Send + Sync>;

/// Metric-find source answering from a table, recording every call.
///
/// Queries without an entry fall back to the responder set with
/// [`respond_with`](Self::respond_with), or to an empty result.
#[derive(Default)]
pub struct MockSource {
    answers: Mutex<BTreeMap<String, Result<Vec<MetricFindValue>, String>>>,
    responder: Option<Responder>,
    gates: Mutex<BTreeMap<String, Shared<BoxFuture<'static, ()>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source computing every answer from the query text.
    pub fn respond_with(f: impl Fn(&str) -> Vec<MetricFindValue> + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Box::new(f)),
            ..Self::default()
        }
    }

    /// Answer `query` with one row per text.
    pub fn answer(self, query: &str, texts: &[&str]) -> Self {
        let rows = texts.iter().map(|t| MetricFindValue::text(*t)).collect();
        self.answers.lock().insert(query.to_string(), Ok(rows));
        self
    }

    pub fn answer_rows(self, query: &str, rows: Vec<MetricFindValue>) -> Self {
        self.answers.lock().insert(query.to_string(), Ok(rows));
        self
    }

    /// Replace the answer for `query` on a shared source.
    pub fn set_answer(&self, query: &str, texts: &[&str]) {
        let rows = texts.iter().map(|t| MetricFindValue::text(*t)).collect();
        self.answers.lock().insert(query.to_string(), Ok(rows));
    }

    /// Make `query` fail with `message`.
    pub fn fail(self, query: &str, message: &str) -> Self {
        self.answers
            .lock()
            .insert(query.to_string(), Err(message.to_string()));
        self
    }

    /// Hold calls for `query` until the returned gate is opened (or dropped).
    pub fn gate(&self, query: &str) -> Gate {
        let (tx, rx) = oneshot::channel::<()>();
        self.gates
            .lock()
            .insert(query.to_string(), rx.map(|_| ()).boxed().shared());
        Gate { tx: Some(tx) }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.query.clone()).collect()
    }

    pub fn call_count(&self, query: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.query == query).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl MetricFindSource for MockSource {
    async fn metric_find_query(
        &self,
        query: &str,
        options: &MetricFindOptions,
    ) -> Result<Vec<MetricFindValue>, VariableError> {
        self.calls.lock().push(RecordedCall {
            query: query.to_string(),
            options: options.clone(),
        });

        let gate = self.gates.lock().get(query).cloned();
        if let Some(gate) = gate {
            gate.await;
        }

        let answer = self.answers.lock().get(query).cloned();
        match answer {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(message)) => Err(VariableError::query(message)),
            None => Ok(self.responder.as_ref().map(|f| f(query)).unwrap_or_default()),
        }
    }
}

/// Releases calls held by [`MockSource::gate`].
pub struct Gate {
    tx: Option<oneshot::Sender<()>>,
}

impl Gate {
    pub fn open(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Datasource registry over a fixed list of sources. The first source is
/// the default unless another is flagged as such.
#[derive(Default)]
pub struct StaticDatasources {
    sources: Vec<(DatasourceInstance, Arc<dyn MetricFindSource>)>,
}

impl StaticDatasources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `source` as the default datasource `"default"`.
    pub fn single(source: Arc<dyn MetricFindSource>) -> Self {
        Self::new().with(DatasourceInstance::new("default", "mock"), source)
    }

    pub fn with(mut self, instance: DatasourceInstance, source: Arc<dyn MetricFindSource>) -> Self {
        self.sources.push((instance, source));
        self
    }
}

impl DatasourceProvider for StaticDatasources {
    fn get(&self, name: Option<&str>) -> Result<Arc<dyn MetricFindSource>, VariableError> {
        let found = match name {
            Some(name) => self.sources.iter().find(|(i, _)| i.name == name),
            None => self
                .sources
                .iter()
                .find(|(i, _)| i.is_default)
                .or_else(|| self.sources.first()),
        };
        found.map(|(_, s)| Arc::clone(s)).ok_or_else(|| {
            VariableError::new(VariableErrorKind::Datasource)
                .with_message(format!("datasource `{}` not found", name.unwrap_or("default")))
        })
    }

    fn list(&self) -> Vec<DatasourceInstance> {
        self.sources.iter().map(|(i, _)| i.clone()).collect()
    }
}

/// Clock and time range under test control.
#[derive(Debug)]
pub struct FixedTimeSource {
    now: DateTime<Utc>,
    range: Mutex<TimeRange>,
}

impl FixedTimeSource {
    /// `now` is 2024-01-15 12:00:00 UTC and the range is the last 6 hours.
    pub fn new() -> Self {
        let now = reference_now();
        Self {
            now,
            range: Mutex::new(last(now, 6)),
        }
    }

    pub fn now_value(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn set_range(&self, range: TimeRange) {
        *self.range.lock() = range;
    }

    /// Switch to the last `hours` hours before `now`.
    pub fn set_last_hours(&self, hours: i64) {
        self.set_range(last(self.now, hours));
    }
}

impl Default for FixedTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for FixedTimeSource {
    fn time_range(&self) -> TimeRange {
        self.range.lock().clone()
    }

    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

pub fn reference_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

fn last(now: DateTime<Utc>, hours: i64) -> TimeRange {
    TimeRange::relative(now - Duration::hours(hours), now, format!("now-{hours}h"), "now")
}

/// A [`VariableSrv`] wired to in-memory services.
pub struct Harness {
    pub srv: VariableSrv,
    pub source: Arc<MockSource>,
    pub time: Arc<FixedTimeSource>,
    pub url: Arc<MemoryUrlStore>,
}

impl Harness {
    pub fn new(source: MockSource) -> Self {
        Self::build(source, "", TemplatingConfig::default())
    }

    pub fn with_url(source: MockSource, query: &str) -> Self {
        Self::build(source, query, TemplatingConfig::default())
    }

    pub fn build(source: MockSource, url_query: &str, config: TemplatingConfig) -> Self {
        let source = Arc::new(source);
        let time = Arc::new(FixedTimeSource::new());
        let url = Arc::new(MemoryUrlStore::from_query(url_query));
        let datasources = Arc::new(StaticDatasources::single(source.clone()));
        let services = Services::new(datasources, time.clone(), url.clone());
        Self {
            srv: VariableSrv::new(config, services),
            source,
            time,
            url,
        }
    }

    pub fn variable(&self, name: &str) -> Variable {
        self.srv
            .templates()
            .get(name)
            .unwrap_or_else(|| panic!("variable `{name}` is not declared"))
    }

    /// Option texts of `name`.
    pub fn option_texts(&self, name: &str) -> Vec<String> {
        self.variable(name)
            .options()
            .iter()
            .map(|o| o.text.clone())
            .collect()
    }

    pub fn current_text(&self, name: &str) -> String {
        self.variable(name).current().text.clone()
    }
}

/// Every event already published, without waiting for more.
pub fn drain_events(events: &mut mpsc::UnboundedReceiver<DashboardEvent>) -> Vec<DashboardEvent> {
    let mut out = Vec::new();
    while let Some(Some(event)) = events.next().now_or_never() {
        out.push(event);
    }
    out
}

/* ───────────────────────── fixtures ───────────────────────── */

/// Query variable refreshed on dashboard load.
pub fn query_var(name: &str, query: &str) -> Variable {
    let mut def = QueryVariable::new(query);
    def.refresh = Refresh::OnDashboardLoad;
    Variable::new(name, VariableKind::Query(def))
}

/// Query variable with a multi/include-all selection policy.
pub fn multi_query_var(name: &str, query: &str, include_all: bool) -> Variable {
    let mut def = QueryVariable::new(query);
    def.refresh = Refresh::OnDashboardLoad;
    def.selection.multi = true;
    def.selection.include_all = include_all;
    Variable::new(name, VariableKind::Query(def))
}

pub fn custom_var(name: &str, query: &str) -> Variable {
    Variable::new(name, VariableKind::Custom(CustomVariable::new(query)))
}
