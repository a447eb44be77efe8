use dashvars_common::TimeZoneSpec;
use serde::Deserialize;

/// Configuration for the templating engine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplatingConfig {
    /// Timezone used for date math and published as `$__timezone`.
    pub timezone: TimeZoneSpec,
    /// Mirror selections into `var-<name>` URL parameters.
    pub url_sync: bool,
    /// Step count used by interval variables that do not set `auto_count`.
    pub default_auto_count: u32,
    /// Lower bound used by interval variables that do not set `auto_min`.
    pub default_auto_min: String,
}

impl Default for TemplatingConfig {
    fn default() -> Self {
        Self {
            timezone: TimeZoneSpec::default(),
            url_sync: true,
            default_auto_count: 30,
            default_auto_min: "10s".to_string(),
        }
    }
}

impl TemplatingConfig {
    pub fn with_timezone(mut self, timezone: TimeZoneSpec) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn without_url_sync(mut self) -> Self {
        self.url_sync = false;
        self
    }
}
