//! Collaborators the engine talks to: datasources, the time picker and the
//! URL. All of them are supplied by the host through [`Services`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashvars_common::{TimeRange, UrlValue, VariableError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One row returned by a datasource's metric-find query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFindValue {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl MetricFindValue {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value: None,
        }
    }

    pub fn with_value(text: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value: Some(value.into()),
        }
    }
}

/// Extra context handed to a metric-find query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricFindOptions {
    /// The dashboard range, only set for variables refreshed on time change.
    pub range: Option<TimeRange>,
    /// Name of the variable being resolved.
    pub variable: String,
    pub search_filter: Option<String>,
}

/// A datasource able to enumerate candidate values.
#[async_trait]
pub trait MetricFindSource: Send + Sync {
    async fn metric_find_query(
        &self,
        query: &str,
        options: &MetricFindOptions,
    ) -> Result<Vec<MetricFindValue>, VariableError>;
}

/// A configured datasource instance, as listed to datasource variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceInstance {
    pub name: String,
    /// Plugin type id, e.g. `prometheus`.
    pub plugin_id: String,
    #[serde(default)]
    pub is_default: bool,
}

impl DatasourceInstance {
    pub fn new(name: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_id: plugin_id.into(),
            is_default: false,
        }
    }
}

/// Registry of datasources.
pub trait DatasourceProvider: Send + Sync {
    /// Find a datasource by name; `None` asks for the default one.
    fn get(&self, name: Option<&str>) -> Result<Arc<dyn MetricFindSource>, VariableError>;

    fn list(&self) -> Vec<DatasourceInstance>;
}

/// Source of the dashboard time range.
pub trait TimeSource: Send + Sync {
    fn time_range(&self) -> TimeRange;

    /// The instant `now` refers to in date math.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Query parameters, keyed by name. Repeated keys are kept as a list.
pub type UrlParams = BTreeMap<String, UrlValue>;

/// Read/write access to the location's query string.
pub trait UrlStore: Send + Sync {
    fn params(&self) -> UrlParams;

    fn get(&self, key: &str) -> Option<UrlValue> {
        self.params().remove(key)
    }

    /// Replace the query string with `params`.
    fn set(&self, params: UrlParams);
}

/// In-memory [`UrlStore`].
#[derive(Debug, Default)]
pub struct MemoryUrlStore {
    params: Mutex<UrlParams>,
}

impl MemoryUrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded from a query string such as `var-app=a&var-app=b`.
    pub fn from_query(query: &str) -> Self {
        let params = crate::url_sync::parse_query(query);
        Self {
            params: Mutex::new(params),
        }
    }

    /// Render the stored parameters back into a query string.
    pub fn query_string(&self) -> String {
        crate::url_sync::to_url_params(self.params.lock().iter())
    }
}

impl UrlStore for MemoryUrlStore {
    fn params(&self) -> UrlParams {
        self.params.lock().clone()
    }

    fn get(&self, key: &str) -> Option<UrlValue> {
        self.params.lock().get(key).cloned()
    }

    fn set(&self, params: UrlParams) {
        *self.params.lock() = params;
    }
}

/// Everything the orchestrator needs from its host.
#[derive(Clone)]
pub struct Services {
    pub datasources: Arc<dyn DatasourceProvider>,
    pub time: Arc<dyn TimeSource>,
    pub url: Arc<dyn UrlStore>,
}

impl Services {
    pub fn new(
        datasources: Arc<dyn DatasourceProvider>,
        time: Arc<dyn TimeSource>,
        url: Arc<dyn UrlStore>,
    ) -> Self {
        Self {
            datasources,
            time,
            url,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
