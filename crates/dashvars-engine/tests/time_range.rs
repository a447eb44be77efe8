use dashvars_common::TimeZoneSpec;
use dashvars_engine::variable::{IntervalVariable, QueryVariable, TimeExpressionVariable};
use dashvars_engine::{
    DashboardEvent, Refresh, TemplatingConfig, TimeSource, Variable, VariableKind,
};
use dashvars_testkit::{Harness, MockSource, drain_events, query_var};
use pretty_assertions::assert_eq;

fn time_query(name: &str, query: &str) -> Variable {
    let mut def = QueryVariable::new(query);
    def.refresh = Refresh::OnTimeRangeChange;
    Variable::new(name, VariableKind::Query(def))
}

#[tokio::test]
async fn time_range_refreshes_followers_and_their_dependents() {
    let source = MockSource::new()
        .answer("series.*", &["s1"])
        .answer("s1.sub", &["a"])
        .answer("s2.sub", &["b"])
        .answer("static.*", &["x"]);
    let h = Harness::new(source);
    h.srv
        .init(vec![
            time_query("series", "series.*"),
            query_var("sub", "$series.sub"),
            query_var("fixed", "static.*"),
        ])
        .await
        .unwrap();
    let mut events = h.srv.subscribe();

    h.source.set_answer("series.*", &["s2"]);
    h.time.set_last_hours(24);
    h.srv.on_time_range_updated().await.unwrap();

    assert_eq!(h.current_text("series"), "s2");
    assert_eq!(h.current_text("sub"), "b");
    assert_eq!(h.source.call_count("static.*"), 1);
    assert_eq!(
        drain_events(&mut events),
        vec![
            DashboardEvent::VariableValueChanged { name: "series".into() },
            DashboardEvent::VariableValueChanged { name: "sub".into() },
            DashboardEvent::Refresh,
        ]
    );

    let last_series_call = h
        .source
        .calls()
        .into_iter()
        .rev()
        .find(|c| c.query == "series.*")
        .unwrap();
    assert_eq!(last_series_call.options.range, Some(h.time.time_range()));
    assert_eq!(h.url.query_string(), "var-fixed=x&var-series=s2&var-sub=b");
}

#[tokio::test]
async fn unchanged_options_only_request_a_refresh() {
    let h = Harness::new(MockSource::new().answer("series.*", &["s1"]));
    h.srv.init(vec![time_query("series", "series.*")]).await.unwrap();
    let mut events = h.srv.subscribe();

    h.srv.on_time_range_updated().await.unwrap();

    assert_eq!(h.source.call_count("series.*"), 2);
    assert_eq!(drain_events(&mut events), vec![DashboardEvent::Refresh]);
}

#[tokio::test]
async fn auto_interval_follows_the_range() {
    let h = Harness::new(MockSource::new());
    let step = IntervalVariable::new("1m,10m,1h").with_auto(30, "10s");
    h.srv
        .init(vec![Variable::new("step", VariableKind::Interval(step))])
        .await
        .unwrap();

    assert_eq!(h.option_texts("step"), vec!["auto", "1m", "10m", "1h"]);
    let templates = h.srv.templates();
    assert_eq!(templates.replace("$step", None, None), "10m");
    assert_eq!(templates.replace("$__auto_interval_step", None, None), "10m");
    assert_eq!(templates.replace("$__auto_interval", None, None), "10m");

    h.time.set_last_hours(24);
    h.srv.on_time_range_updated().await.unwrap();
    assert_eq!(templates.replace("$step", None, None), "1h");
}

#[tokio::test]
async fn time_expressions_are_evaluated_in_the_dashboard_timezone() {
    let h = Harness::build(
        MockSource::new(),
        "",
        TemplatingConfig::default().with_timezone(TimeZoneSpec::Utc),
    );
    let day = TimeExpressionVariable::new("now-1d/d", "%Y-%m-%d");
    let stamp = TimeExpressionVariable::new("now/h", "%H:%M");
    h.srv
        .init(vec![
            Variable::new("day", VariableKind::TimeExpression(day)),
            Variable::new("stamp", VariableKind::TimeExpression(stamp)),
        ])
        .await
        .unwrap();

    assert_eq!(h.current_text("day"), "2024-01-14");
    assert_eq!(h.current_text("stamp"), "12:00");
    assert_eq!(h.srv.templates().replace("from $day", None, None), "from 2024-01-14");
}
