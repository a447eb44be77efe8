//! Dashboard-level variable lifecycle.
//!
//! [`VariableSrv`] owns the shared [`TemplateSrv`], drives initialization in
//! dependency order, cascades refreshes to dependents, reacts to time-range
//! and URL changes and publishes [`DashboardEvent`]s to subscribers.

mod lock;

pub use lock::LockWaiter;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashvars_common::{Selection, UrlValue, VariableError, VariableErrorKind};
use futures::channel::mpsc;
use futures::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::config::TemplatingConfig;
use crate::error::EngineError;
use crate::graph::DependencyGraph;
use crate::interpolate::TemplateSrv;
use crate::scheduler::Schedule;
use crate::traits::Services;
use crate::url_sync::{VAR_PREFIX, is_url_value_different, url_key};
use crate::variable::{AdHocVariable, Refresh, ResolveContext, Variable, VariableKind};
use lock::LockTable;

const ADHOC_VARIABLE_NAME: &str = "Filters";

/// Signals published to the hosting dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardEvent {
    /// Initialization finished (successfully or not).
    VariablesInitialized,
    /// A variable's value changed in a way panels should see.
    VariableValueChanged { name: String },
    /// Panels should re-run their queries.
    Refresh,
}

#[derive(Default)]
struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<DashboardEvent>>>,
}

impl EventBus {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<DashboardEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, event: DashboardEvent) {
        // closed receivers are dropped here
        self.subscribers
            .lock()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}

#[derive(Default)]
struct RefreshOutcome {
    changed: Vec<String>,
    failures: Vec<VariableError>,
}

fn cycle_error(name: &str) -> VariableError {
    VariableError::new(VariableErrorKind::Cycle)
        .with_message("variable is part of a dependency cycle")
        .for_variable(name)
}

#[cfg(feature = "tracing")]
fn traced<F: Future>(future: F, span: tracing::Span) -> impl Future<Output = F::Output> {
    tracing::Instrument::instrument(future, span)
}

#[cfg(not(feature = "tracing"))]
fn traced<F: Future>(future: F, _span: ()) -> F {
    future
}

macro_rules! span {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        let span = tracing::info_span!($($arg)*);
        #[cfg(not(feature = "tracing"))]
        let span = ();
        span
    }};
}

/// Lifecycle driver for the variables of one dashboard.
pub struct VariableSrv {
    config: TemplatingConfig,
    templates: Arc<TemplateSrv>,
    services: Services,
    locks: LockTable,
    /// Bumped on every init and teardown; results resolved under an older
    /// generation are discarded.
    generation: AtomicU64,
    events: EventBus,
}

impl std::fmt::Debug for VariableSrv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableSrv")
            .field("config", &self.config)
            .field("variables", &self.templates.names())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl VariableSrv {
    pub fn new(config: TemplatingConfig, services: Services) -> Self {
        let templates = Arc::new(TemplateSrv::new(config.timezone.clone()));
        Self {
            config,
            templates,
            services,
            locks: LockTable::default(),
            generation: AtomicU64::new(0),
            events: EventBus::default(),
        }
    }

    /// The interpolation service shared with panels.
    pub fn templates(&self) -> &Arc<TemplateSrv> {
        &self.templates
    }

    pub fn config(&self) -> &TemplatingConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DashboardEvent> {
        self.events.subscribe()
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn resolve_context(&self) -> ResolveContext<'_> {
        ResolveContext {
            templates: &self.templates,
            datasources: &*self.services.datasources,
            time: &*self.services.time,
            config: &self.config,
        }
    }

    /// Dependency graph of the variables as they are now.
    pub fn graph(&self) -> DependencyGraph {
        DependencyGraph::from_variables(&self.templates.variables())
    }

    /// Variables `name` references.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.graph()
            .neighbors(name)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Variables referencing `name` directly.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.graph()
            .dependents(name)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /* ───────────────────────── initialization ───────────────────────── */

    /// Install `variables` and bring every one of them to a settled state.
    ///
    /// A `var-<name>` URL parameter wins over resolution. Variables wait
    /// for the ones they reference; independent ones proceed concurrently.
    /// Individual failures do not stop the others and are returned together
    /// once everything has settled.
    pub async fn init(&self, variables: Vec<Variable>) -> Result<(), EngineError> {
        let span = span!("variables_init", count = variables.len());
        traced(self.init_inner(variables), span).await
    }

    async fn init_inner(&self, variables: Vec<Variable>) -> Result<(), EngineError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut failures = Vec::new();

        let mut seen = FxHashSet::default();
        let mut unique = Vec::with_capacity(variables.len());
        for variable in variables {
            if seen.insert(variable.name().to_string()) {
                unique.push(variable);
            } else {
                failures.push(
                    VariableError::new(VariableErrorKind::DuplicateName)
                        .with_message("Variable with the same name already exists")
                        .for_variable(variable.name()),
                );
            }
        }

        self.templates
            .init(unique, Some(self.services.time.time_range()));

        let variables = self.templates.variables();
        let graph = DependencyGraph::from_variables(&variables);
        let schedule = graph.init_schedule();
        let cyclic: FxHashSet<&str> = schedule.cyclic_nodes().map(|id| graph.name(id)).collect();

        self.locks.acquire_all(variables.iter().map(Variable::name));
        let url_params = self.services.url.params();

        let tasks = variables.iter().map(|variable| {
            let name = variable.name();
            let waiters: Vec<LockWaiter> = graph
                .neighbors(name)
                .into_iter()
                .filter_map(|dependency| self.locks.waiter(dependency))
                .collect();
            let url_value = url_params.get(&url_key(name)).cloned();
            self.process_variable(name, waiters, url_value, cyclic.contains(name), generation)
        });

        for result in join_all(tasks).await {
            if let Err(err) = result {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "variable failed to initialize");
                failures.push(err);
            }
        }

        self.events.publish(DashboardEvent::VariablesInitialized);
        EngineError::from_failures(failures, |failures| EngineError::Init { failures })
    }

    async fn process_variable(
        &self,
        name: &str,
        waiters: Vec<LockWaiter>,
        url_value: Option<UrlValue>,
        cyclic: bool,
        generation: u64,
    ) -> Result<(), VariableError> {
        let outcome = if cyclic {
            Err(cycle_error(name))
        } else {
            join_all(waiters).await;
            self.settle_variable(name, url_value, generation).await
        };
        self.locks.release(name);
        outcome
    }

    async fn settle_variable(
        &self,
        name: &str,
        url_value: Option<UrlValue>,
        generation: u64,
    ) -> Result<(), VariableError> {
        if let Some(url_value) = url_value {
            #[cfg(feature = "tracing")]
            tracing::debug!(variable = name, "value taken from url");
            // static kinds still build their options locally; only queries are skipped
            let local = self
                .templates
                .with_variable(name, Variable::needs_local_options)
                .unwrap_or(false);
            let built = if local {
                self.resolve(name, None, generation).await.map(|_| ())
            } else {
                Ok(())
            };
            if matches!(&built, Err(err) if err.kind == VariableErrorKind::Stale) {
                return built;
            }
            self.templates
                .update_variable(name, |v| v.set_value_from_url(&url_value));
            return built;
        }
        let needs_resolution = self
            .templates
            .with_variable(name, Variable::needs_resolution_on_init)
            .unwrap_or(false);
        if needs_resolution {
            self.resolve(name, None, generation).await?;
        }
        Ok(())
    }

    /// Recompute the options of `name` without holding any lock across the
    /// await, then store the result. Returns whether the options changed.
    async fn resolve(
        &self,
        name: &str,
        search_filter: Option<&str>,
        generation: u64,
    ) -> Result<bool, VariableError> {
        let mut working = self
            .templates
            .get(name)
            .ok_or_else(|| VariableError::not_found(name).for_variable(name))?;
        let before = working.state.options.clone();

        let ctx = self.resolve_context();
        let builtins = working
            .update_options(&ctx, search_filter)
            .await
            .map_err(|e| e.for_variable(name))?;

        if self.current_generation() != generation {
            #[cfg(feature = "tracing")]
            tracing::debug!(variable = name, "discarding result for a replaced dashboard");
            return Err(VariableError::new(VariableErrorKind::Stale)
                .with_message("dashboard changed while resolving")
                .for_variable(name));
        }

        let changed = before != working.state.options;
        for (key, value) in &builtins {
            self.templates.set_builtin(key, value);
        }
        self.templates.put(working);
        Ok(changed)
    }

    /// Resolve `schedule` layer by layer; nodes of one layer run
    /// concurrently.
    async fn run_schedule(
        &self,
        graph: &DependencyGraph,
        schedule: &Schedule,
        generation: u64,
    ) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();
        for id in schedule.cyclic_nodes() {
            outcome.failures.push(cycle_error(graph.name(id)));
        }

        for layer in &schedule.layers {
            let results = join_all(layer.nodes.iter().map(|&id| {
                let name = graph.name(id);
                async move { (name, self.resolve(name, None, generation).await) }
            }))
            .await;

            for (name, result) in results {
                match result {
                    Ok(true) => outcome.changed.push(name.to_string()),
                    Ok(false) => {}
                    Err(err) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(variable = name, error = %err, "refresh failed");
                        outcome.failures.push(err);
                    }
                }
            }
        }
        outcome
    }

    /* ───────────────────────── updates ───────────────────────── */

    /// Re-resolve `name` (optionally narrowed by a search filter) and
    /// refresh what depends on it.
    pub async fn update_options(
        &self,
        name: &str,
        search_filter: Option<&str>,
    ) -> Result<(), EngineError> {
        let generation = self.current_generation();
        self.resolve(name, search_filter, generation).await?;
        self.variable_updated(name, false).await
    }

    /// Apply `selection` to `name`, then cascade.
    pub async fn set_value(
        &self,
        name: &str,
        selection: Selection,
        emit_change_events: bool,
    ) -> Result<(), EngineError> {
        self.templates
            .update_variable(name, |v| v.set_value(selection))
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))?;
        self.variable_updated(name, emit_change_events).await
    }

    /// Refresh every variable downstream of `name`, each exactly once and
    /// after everything it references, then rewrite the URL.
    ///
    /// Does nothing while `name` is still initializing.
    pub async fn variable_updated(
        &self,
        name: &str,
        emit_change_events: bool,
    ) -> Result<(), EngineError> {
        if self.locks.is_locked(name) {
            return Ok(());
        }
        if self.templates.with_variable(name, |_| ()).is_none() {
            return Err(EngineError::UnknownVariable(name.to_string()));
        }
        let span = span!("variable_updated", variable = name);
        traced(self.cascade(name, emit_change_events), span).await
    }

    async fn cascade(&self, name: &str, emit_change_events: bool) -> Result<(), EngineError> {
        let generation = self.current_generation();
        let graph = self.graph();
        let schedule = graph.cascade_schedule([name]);
        let outcome = self.run_schedule(&graph, &schedule, generation).await;

        self.update_url();
        if emit_change_events {
            self.value_changed(name);
            self.events.publish(DashboardEvent::Refresh);
        }
        EngineError::from_failures(outcome.failures, |failures| EngineError::Refresh { failures })
    }

    fn value_changed(&self, name: &str) {
        self.events.publish(DashboardEvent::VariableValueChanged {
            name: name.to_string(),
        });
    }

    /// Pick up a new time range: refresh the variables that follow it (and
    /// their dependents), announce the ones whose options actually changed
    /// and request one dashboard refresh.
    pub async fn on_time_range_updated(&self) -> Result<(), EngineError> {
        let span = span!("time_range_updated");
        traced(self.time_range_updated(), span).await
    }

    async fn time_range_updated(&self) -> Result<(), EngineError> {
        self.templates
            .update_time_range(self.services.time.time_range());

        let generation = self.current_generation();
        let variables = self.templates.variables();
        let graph = DependencyGraph::from_variables(&variables);
        let schedule = graph.refresh_schedule(
            variables
                .iter()
                .filter(|v| v.refresh() == Refresh::OnTimeRangeChange)
                .map(Variable::name),
        );
        let outcome = self.run_schedule(&graph, &schedule, generation).await;

        for name in &outcome.changed {
            self.value_changed(name);
        }
        if !outcome.changed.is_empty() {
            self.update_url();
        }
        self.events.publish(DashboardEvent::Refresh);
        EngineError::from_failures(outcome.failures, |failures| EngineError::Refresh { failures })
    }

    /// Add or replace a filter on the ad-hoc variable bound to `datasource`,
    /// creating that variable when the dashboard has none.
    pub async fn set_adhoc_filter(
        &self,
        datasource: Option<&str>,
        key: &str,
        value: &str,
        operator: &str,
    ) -> Result<(), EngineError> {
        let existing = self.templates.variables().into_iter().find_map(|v| match &v.kind {
            VariableKind::AdHoc(adhoc) if adhoc.datasource.as_deref() == datasource => {
                Some(v.state.name.clone())
            }
            _ => None,
        });

        let name = match existing {
            Some(name) => name,
            None => {
                let name = self.unused_name(ADHOC_VARIABLE_NAME);
                let variable =
                    Variable::new(name.clone(), VariableKind::AdHoc(AdHocVariable::new(datasource)));
                self.templates.add(variable)?;
                name
            }
        };

        self.templates.update_variable(&name, |v| {
            if let VariableKind::AdHoc(adhoc) = &mut v.kind {
                adhoc.upsert_filter(key, value, operator);
            }
        });
        self.variable_updated(&name, true).await
    }

    fn unused_name(&self, base: &str) -> String {
        let names = self.templates.names();
        if !names.iter().any(|n| n == base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base}{n}"))
            .find(|candidate| !names.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /* ───────────────────────── editing ───────────────────────── */

    /// Append a variable. Its options are not resolved until asked for.
    pub fn add_variable(&self, variable: Variable) -> Result<(), EngineError> {
        self.templates.add(variable)?;
        Ok(())
    }

    pub fn remove_variable(&self, name: &str) -> Result<Variable, EngineError> {
        self.locks.release(name);
        self.templates
            .remove(name)
            .ok_or_else(|| EngineError::UnknownVariable(name.to_string()))
    }

    pub fn rename_variable(&self, old: &str, new: &str) -> Result<(), EngineError> {
        self.templates.rename(old, new)?;
        Ok(())
    }

    /* ───────────────────────── URL ───────────────────────── */

    /// Apply `var-<name>` parameters that differ from the current
    /// selections, refresh their dependents and announce the change once.
    pub async fn sync_from_url(&self) -> Result<(), EngineError> {
        let params = self.services.url.params();
        let mut changed = Vec::new();
        for variable in self.templates.variables() {
            let Some(url_value) = params.get(&url_key(variable.name())) else {
                continue;
            };
            if is_url_value_different(&variable.value_for_url(), url_value) {
                changed.push((variable.state.name.clone(), url_value.clone()));
            }
        }
        if changed.is_empty() {
            return Ok(());
        }

        for (name, url_value) in &changed {
            self.templates
                .update_variable(name, |v| v.set_value_from_url(url_value));
        }

        let generation = self.current_generation();
        let graph = self.graph();
        let schedule = graph.cascade_schedule(changed.iter().map(|(name, _)| name.as_str()));
        let outcome = self.run_schedule(&graph, &schedule, generation).await;

        for (name, _) in &changed {
            self.value_changed(name);
        }
        self.events.publish(DashboardEvent::Refresh);
        EngineError::from_failures(outcome.failures, |failures| EngineError::Refresh { failures })
    }

    /// Rewrite the `var-*` parameters from the current selections, keeping
    /// every other parameter.
    pub fn update_url(&self) {
        if !self.config.url_sync {
            return;
        }
        let mut params = self.services.url.params();
        params.retain(|key, _| !key.starts_with(VAR_PREFIX));
        self.templates.fill_variable_values_for_url(&mut params, None);
        self.services.url.set(params);
    }

    /* ───────────────────────── persistence ───────────────────────── */

    /// Variables in their persisted form.
    pub fn save_model(&self) -> Vec<Variable> {
        self.templates
            .variables()
            .iter()
            .map(Variable::save_model)
            .collect()
    }

    pub fn save_model_json(&self) -> Result<serde_json::Value, EngineError> {
        Ok(serde_json::to_value(self.save_model())?)
    }

    /// Drop the dashboard: pending resolutions are discarded when they
    /// complete and no further events reference its variables.
    pub fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.locks.release_all();
        self.templates.init(Vec::new(), None);
    }
}
