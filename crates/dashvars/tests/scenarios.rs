//! End-to-end dashboard scenarios through the facade crate.
use dashvars::engine::Refresh;
use dashvars::engine::variable::{IntervalVariable, QueryVariable};
use dashvars::{
    Current, MetricFindValue, OptionValue, Selection, TemplateSrv, TimeZoneSpec, Variable,
    VariableFormat, VariableKind,
};
use dashvars_testkit::{Harness, MockSource, custom_var, multi_query_var, query_var};
use pretty_assertions::assert_eq;

fn texts(variable: &Variable) -> Vec<(&str, &str)> {
    variable
        .options()
        .iter()
        .map(|o| (o.text.as_str(), o.value.as_str()))
        .collect()
}

#[tokio::test]
async fn url_override_feeds_the_first_resolution_of_dependents() {
    let source = MockSource::new()
        .answer("app1.*", &["a1"])
        .answer("google.*", &["g1", "g2"]);
    let h = Harness::with_url(source, "var-app=google");

    let app = custom_var("app", "app1,google").with_current(Current::new("app1", "app1"));
    h.srv
        .init(vec![app, query_var("server", "$app.*")])
        .await
        .unwrap();

    assert_eq!(h.source.call_count("google.*"), 1);
    assert_eq!(h.source.queries(), vec!["google.*"]);
    assert_eq!(h.option_texts("server"), vec!["g1", "g2"]);
}

#[test]
fn glob_and_pipe_apply_to_the_token_only() {
    let srv = TemplateSrv::new(TimeZoneSpec::Utc);
    let test = custom_var("test", "value1,value2")
        .with_current(Current::new("value1 + value2", vec!["value1", "value2"]));
    srv.init(vec![test], None);

    assert_eq!(
        srv.replace("this.$test.filters", None, Some(VariableFormat::Glob)),
        "this.{value1,value2}.filters"
    );
    assert_eq!(
        srv.replace("this=$test", None, Some(VariableFormat::Pipe)),
        "this=value1|value2"
    );
}

#[tokio::test]
async fn comma_lists_keep_source_order() {
    let h = Harness::new(MockSource::new());
    let interval = Variable::new(
        "interval",
        VariableKind::Interval(IntervalVariable::new("1s,2h,5h,1d")),
    );
    h.srv
        .init(vec![custom_var("custom", "1s,2h,5h,1d"), interval])
        .await
        .unwrap();
    h.srv.update_options("custom", None).await.unwrap();
    h.srv.update_options("interval", None).await.unwrap();

    let expected = vec![("1s", "1s"), ("2h", "2h"), ("5h", "5h"), ("1d", "1d")];
    assert_eq!(texts(&h.variable("custom")), expected);
    assert_eq!(texts(&h.variable("interval")), expected);
}

#[tokio::test]
async fn regex_capture_becomes_text_and_value() {
    let source = MockSource::new().answer(
        "apps.backend.*",
        &["apps.backend.backend_01.counters.req", "apps.backend.backend_02.counters.req"],
    );
    let h = Harness::new(source);
    let mut def = QueryVariable::new("apps.backend.*");
    def.regex = Some("/apps.*(backend_[0-9]+)/".to_string());
    def.refresh = Refresh::OnDashboardLoad;

    h.srv
        .init(vec![Variable::new("backend", VariableKind::Query(def))])
        .await
        .unwrap();

    assert_eq!(
        texts(&h.variable("backend")),
        vec![("backend_01", "backend_01"), ("backend_02", "backend_02")]
    );
}

#[tokio::test]
async fn include_all_puts_all_first() {
    let h = Harness::new(MockSource::new().answer("hosts.*", &["h1", "h2"]));
    h.srv
        .init(vec![multi_query_var("host", "hosts.*", true)])
        .await
        .unwrap();

    assert_eq!(
        texts(&h.variable("host")),
        vec![("All", "$__all"), ("h1", "h1"), ("h2", "h2")]
    );
}

#[tokio::test]
async fn multi_selection_survives_partial_overlap_only() {
    let h = Harness::new(MockSource::new().answer("q", &["val1", "val2", "val3"]));
    h.srv
        .init(vec![multi_query_var("srv", "q", false)])
        .await
        .unwrap();
    h.srv
        .set_value("srv", Selection::value(vec!["val1", "val2", "val3"]), false)
        .await
        .unwrap();

    h.source.set_answer("q", &["val2", "val3"]);
    h.srv.update_options("srv", None).await.unwrap();
    let current = h.variable("srv").current().clone();
    assert_eq!(current.value, OptionValue::from(vec!["val2", "val3"]));
    assert_eq!(current.text, "val2 + val3");

    h.source.set_answer("q", &["val5", "val6"]);
    h.srv.update_options("srv", None).await.unwrap();
    let current = h.variable("srv").current().clone();
    assert_eq!(current.value, OptionValue::from("val5"));
    assert_eq!(current.text, "val5");
}

#[tokio::test]
async fn diamond_cascade_refreshes_each_dependent_once() {
    let source = MockSource::respond_with(|q| match q {
        "roots.*" => vec![MetricFindValue::text("r1"), MetricFindValue::text("r2")],
        _ => vec![MetricFindValue::text(format!("{q}-x"))],
    });
    let h = Harness::new(source);
    h.srv
        .init(vec![
            query_var("root", "roots.*"),
            query_var("left", "$root.left"),
            query_var("right", "$root.right"),
            query_var("leaf", "$left.$right"),
        ])
        .await
        .unwrap();
    h.source.clear_calls();

    h.srv
        .set_value("root", Selection::value("r2"), true)
        .await
        .unwrap();

    let mut queries = h.source.queries();
    let leaf = queries.pop();
    queries.sort();
    assert_eq!(queries, vec!["r2.left", "r2.right"]);
    assert_eq!(leaf.as_deref(), Some("r2.left-x.r2.right-x"));
}

#[tokio::test]
async fn url_value_reapplied_is_a_no_op() {
    let h = Harness::new(MockSource::new().answer("hosts.*", &["h1", "h2", "h3"]));
    h.srv
        .init(vec![multi_query_var("host", "hosts.*", true)])
        .await
        .unwrap();
    h.srv
        .set_value("host", Selection::value(vec!["h1", "h3"]), false)
        .await
        .unwrap();

    let before = h.variable("host");
    let mut after = before.clone();
    after.set_value_from_url(&before.value_for_url());
    assert_eq!(after.current(), before.current());
}
