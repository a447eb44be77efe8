use dashvars_common::{OptionValue, Selection, VariableErrorKind};
use dashvars_engine::{DashboardEvent, EngineError};
use dashvars_testkit::{Harness, MockSource, drain_events, multi_query_var, query_var};
use pretty_assertions::assert_eq;

fn apps() -> MockSource {
    MockSource::new()
        .answer("apps.*", &["web", "db", "mixed"])
        .answer("web.*", &["w1", "w2"])
        .answer("db.*", &["d1"])
        .answer("mixed.*", &["w2", "w3"])
        .answer("web.w1.*", &["m1"])
        .answer("db.d1.*", &["m2"])
}

async fn three_levels(h: &Harness) {
    h.srv
        .init(vec![
            query_var("app", "apps.*"),
            query_var("server", "$app.*"),
            query_var("metric", "$app.$server.*"),
        ])
        .await
        .unwrap();
    h.source.clear_calls();
}

#[tokio::test]
async fn set_value_refreshes_each_dependent_once_in_order() {
    let h = Harness::new(apps());
    three_levels(&h).await;
    let mut events = h.srv.subscribe();

    h.srv
        .set_value("app", Selection::value("db"), true)
        .await
        .unwrap();

    assert_eq!(h.source.queries(), vec!["db.*", "db.d1.*"]);
    assert_eq!(h.current_text("server"), "d1");
    assert_eq!(h.current_text("metric"), "m2");
    assert_eq!(
        drain_events(&mut events),
        vec![
            DashboardEvent::VariableValueChanged { name: "app".into() },
            DashboardEvent::Refresh,
        ]
    );
    assert_eq!(h.url.query_string(), "var-app=db&var-metric=m2&var-server=d1");
}

#[tokio::test]
async fn silent_updates_publish_no_events() {
    let h = Harness::new(apps());
    three_levels(&h).await;
    let mut events = h.srv.subscribe();

    h.srv
        .set_value("app", Selection::value("db"), false)
        .await
        .unwrap();

    assert_eq!(h.current_text("server"), "d1");
    assert!(drain_events(&mut events).is_empty());
    assert_eq!(h.url.query_string(), "var-app=db&var-metric=m2&var-server=d1");
}

#[tokio::test]
async fn leaf_update_touches_nothing_else() {
    let h = Harness::new(apps());
    three_levels(&h).await;

    h.srv
        .set_value("metric", Selection::value("m1"), false)
        .await
        .unwrap();
    assert!(h.source.queries().is_empty());
}

#[tokio::test]
async fn multi_selection_is_reconciled_after_a_cascade() {
    let h = Harness::new(apps());
    h.srv
        .init(vec![
            query_var("app", "apps.*"),
            multi_query_var("server", "$app.*", false),
        ])
        .await
        .unwrap();
    h.srv
        .set_value("server", Selection::value(vec!["w1", "w2"]), false)
        .await
        .unwrap();

    h.srv
        .set_value("app", Selection::value("mixed"), false)
        .await
        .unwrap();
    let server = h.variable("server");
    assert_eq!(server.current().value, OptionValue::from(vec!["w2"]));
    assert_eq!(server.current().text, "w2");

    h.srv
        .set_value("app", Selection::value("db"), false)
        .await
        .unwrap();
    let server = h.variable("server");
    assert_eq!(server.current().value, OptionValue::from("d1"));
}

#[tokio::test]
async fn update_options_passes_the_search_filter() {
    let h = Harness::new(apps());
    three_levels(&h).await;

    h.srv.update_options("server", Some("w")).await.unwrap();

    let calls = h.source.calls();
    assert_eq!(calls[0].query, "web.*");
    assert_eq!(calls[0].options.variable, "server");
    assert_eq!(calls[0].options.search_filter.as_deref(), Some("w"));
    // the dependent follows, without a filter
    assert_eq!(calls[1].query, "web.w1.*");
    assert_eq!(calls[1].options.search_filter, None);
}

#[tokio::test]
async fn cascade_failures_are_collected() {
    let h = Harness::new(apps().fail("db.d1.*", "timeout"));
    three_levels(&h).await;

    let err = h
        .srv
        .set_value("app", Selection::value("db"), true)
        .await
        .unwrap_err();

    let EngineError::Refresh { failures } = &err else {
        panic!("expected a refresh error, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, VariableErrorKind::Query);
    assert_eq!(failures[0].variable.as_deref(), Some("metric"));
    assert_eq!(h.current_text("server"), "d1");
}

#[tokio::test]
async fn unknown_variables_are_rejected() {
    let h = Harness::new(apps());
    three_levels(&h).await;

    let err = h
        .srv
        .set_value("nope", Selection::value("x"), true)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownVariable(name) if name == "nope"));
}
