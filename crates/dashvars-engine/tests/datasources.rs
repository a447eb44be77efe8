use std::sync::Arc;

use dashvars_common::Selection;
use dashvars_engine::variable::{DatasourceVariable, QueryVariable};
use dashvars_engine::{
    DatasourceInstance, MemoryUrlStore, Refresh, Services, TemplatingConfig, Variable,
    VariableKind, VariableSrv,
};
use dashvars_testkit::{FixedTimeSource, MockSource, StaticDatasources};
use pretty_assertions::assert_eq;

fn texts(srv: &VariableSrv, name: &str) -> Vec<String> {
    srv.templates()
        .get(name)
        .map(|v| v.options().iter().map(|o| o.text.clone()).collect())
        .unwrap_or_default()
}

fn srv_with(prom_a: Arc<MockSource>, prom_b: Arc<MockSource>) -> VariableSrv {
    let datasources = StaticDatasources::new()
        .with(DatasourceInstance::new("prom-a", "prometheus"), prom_a)
        .with(DatasourceInstance::new("logs", "loki"), Arc::new(MockSource::new()))
        .with(DatasourceInstance::new("prom-b", "prometheus"), prom_b);
    let services = Services::new(
        Arc::new(datasources),
        Arc::new(FixedTimeSource::new()),
        Arc::new(MemoryUrlStore::default()),
    );
    VariableSrv::new(TemplatingConfig::default(), services)
}

#[tokio::test]
async fn datasource_variable_routes_dependent_queries() {
    let prom_a = Arc::new(MockSource::new().answer("up", &["a1", "a2"]));
    let prom_b = Arc::new(MockSource::new().answer("up", &["b1"]));
    let srv = srv_with(prom_a.clone(), prom_b.clone());

    let mut series = QueryVariable::new("up");
    series.datasource = Some("$ds".to_string());
    series.refresh = Refresh::OnDashboardLoad;
    srv.init(vec![
        Variable::new("ds", VariableKind::Datasource(DatasourceVariable::new("prometheus"))),
        Variable::new("series", VariableKind::Query(series)),
    ])
    .await
    .unwrap();

    assert_eq!(texts(&srv, "ds"), vec!["prom-a", "prom-b"]);
    assert_eq!(texts(&srv, "series"), vec!["a1", "a2"]);
    assert_eq!(srv.dependencies_of("series"), vec!["ds"]);

    srv.set_value("ds", Selection::value("prom-b"), false)
        .await
        .unwrap();

    assert_eq!(texts(&srv, "series"), vec!["b1"]);
    assert_eq!(prom_a.call_count("up"), 1);
    assert_eq!(prom_b.call_count("up"), 1);
}
