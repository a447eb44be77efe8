use dashvars_common::{Current, VariableErrorKind, VariableOption};
use dashvars_engine::variable::{CustomVariable, QueryVariable};
use dashvars_engine::{DashboardEvent, EngineError, Variable, VariableFormat, VariableKind};
use dashvars_testkit::{Harness, MockSource, custom_var, drain_events, query_var};
use pretty_assertions::assert_eq;

fn sorted(mut queries: Vec<String>) -> Vec<String> {
    queries.sort();
    queries
}

#[tokio::test]
async fn url_value_skips_resolution_and_feeds_dependents() {
    let source = MockSource::new()
        .answer("apps.*", &["backend", "frontend"])
        .answer("google.*", &["g1", "g2"]);
    let h = Harness::with_url(source, "var-app=google");

    h.srv
        .init(vec![query_var("app", "apps.*"), query_var("server", "$app.*")])
        .await
        .unwrap();

    assert_eq!(h.source.queries(), vec!["google.*"]);
    assert_eq!(h.current_text("app"), "google");
    assert_eq!(h.option_texts("server"), vec!["g1", "g2"]);
    assert_eq!(h.current_text("server"), "g1");
}

#[tokio::test]
async fn url_values_still_build_static_options() {
    let h = Harness::with_url(MockSource::new(), "var-x=All&var-y=b");
    let mut x = CustomVariable::new("a,b,c");
    x.selection.multi = true;
    x.selection.include_all = true;

    h.srv
        .init(vec![
            Variable::new("x", VariableKind::Custom(x)),
            custom_var("y", "a,b,c"),
        ])
        .await
        .unwrap();

    assert_eq!(h.option_texts("x"), vec!["All", "a", "b", "c"]);
    assert!(h.variable("x").is_all_selected());
    assert_eq!(h.option_texts("y"), vec!["a", "b", "c"]);
    assert_eq!(h.current_text("y"), "b");
    assert_eq!(
        h.srv.templates().replace("$x", None, Some(VariableFormat::Csv)),
        "a,b,c"
    );
    assert!(h.source.queries().is_empty());
}

#[tokio::test]
async fn dependents_wait_for_their_dependencies() {
    let source = MockSource::new()
        .answer("apps.*", &["web"])
        .answer("web.*", &["w1"])
        .answer("other.*", &["o1"]);
    let gate = source.gate("apps.*");
    let h = Harness::new(source);

    let init = h.srv.init(vec![
        query_var("app", "apps.*"),
        query_var("server", "$app.*"),
        query_var("other", "other.*"),
    ]);
    let probe = async {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        let seen = h.source.queries();
        gate.open();
        seen
    };
    let (result, seen_while_blocked) = tokio::join!(init, probe);
    result.unwrap();

    // the independent branch went ahead, the dependent one waited
    assert_eq!(sorted(seen_while_blocked), vec!["apps.*", "other.*"]);
    assert_eq!(sorted(h.source.queries()), vec!["apps.*", "other.*", "web.*"]);
    assert_eq!(h.current_text("server"), "w1");
}

#[tokio::test]
async fn cycles_fail_without_blocking_the_rest() {
    let h = Harness::new(MockSource::new().answer("c.*", &["c1"]));

    let err = h
        .srv
        .init(vec![
            query_var("a", "$b.*"),
            query_var("b", "$a.*"),
            query_var("c", "c.*"),
        ])
        .await
        .unwrap_err();

    let EngineError::Init { failures } = &err else {
        panic!("expected an init error, got {err:?}");
    };
    let mut failed: Vec<&str> = failures.iter().filter_map(|f| f.variable.as_deref()).collect();
    failed.sort();
    assert_eq!(failed, vec!["a", "b"]);
    assert!(failures.iter().all(|f| f.kind == VariableErrorKind::Cycle));
    assert_eq!(h.source.queries(), vec!["c.*"]);
    assert_eq!(h.option_texts("c"), vec!["c1"]);
}

#[tokio::test]
async fn failed_dependency_still_releases_dependents() {
    let source = MockSource::new()
        .fail("apps.*", "backend down")
        .answer(".*", &["x"]);
    let h = Harness::new(source);

    let err = h
        .srv
        .init(vec![query_var("app", "apps.*"), query_var("server", "$app.*")])
        .await
        .unwrap_err();

    assert_eq!(err.failures().len(), 1);
    assert_eq!(err.failures()[0].kind, VariableErrorKind::Query);
    assert_eq!(err.failures()[0].variable.as_deref(), Some("app"));
    assert_eq!(h.option_texts("server"), vec!["x"]);
}

#[tokio::test]
async fn static_variables_are_computed_and_persisted_options_trusted() {
    let persisted = Variable::new("host", VariableKind::Query(QueryVariable::new("hosts.*")))
        .with_options(vec![VariableOption::text_value("h1"), VariableOption::text_value("h2")])
        .with_current(Current::new("h2", "h2"));
    let h = Harness::new(MockSource::new());
    let mut events = h.srv.subscribe();

    h.srv
        .init(vec![custom_var("env", "prod,dev"), persisted])
        .await
        .unwrap();

    assert_eq!(h.option_texts("env"), vec!["prod", "dev"]);
    assert_eq!(h.current_text("env"), "prod");
    assert_eq!(h.current_text("host"), "h2");
    assert!(h.source.queries().is_empty());
    assert_eq!(drain_events(&mut events), vec![DashboardEvent::VariablesInitialized]);
}

#[tokio::test]
async fn duplicate_names_keep_the_first_declaration() {
    let h = Harness::new(MockSource::new());

    let err = h
        .srv
        .init(vec![custom_var("a", "1"), custom_var("a", "2")])
        .await
        .unwrap_err();

    assert_eq!(err.failures()[0].kind, VariableErrorKind::DuplicateName);
    assert_eq!(h.srv.templates().len(), 1);
    assert_eq!(h.option_texts("a"), vec!["1"]);
}

#[tokio::test]
async fn teardown_discards_results_still_in_flight() {
    let source = MockSource::new().answer("slow.*", &["s"]);
    let gate = source.gate("slow.*");
    let h = Harness::new(source);

    let init = h.srv.init(vec![query_var("slow", "slow.*")]);
    let drop_dashboard = async {
        while h.source.call_count("slow.*") == 0 {
            tokio::task::yield_now().await;
        }
        h.srv.teardown();
        gate.open();
    };
    let (result, ()) = tokio::join!(init, drop_dashboard);

    let err = result.unwrap_err();
    assert_eq!(err.failures()[0].kind, VariableErrorKind::Stale);
    assert!(h.srv.templates().is_empty());
}
