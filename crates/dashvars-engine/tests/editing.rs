use dashvars_common::VariableErrorKind;
use dashvars_engine::{EngineError, parse_variables};
use dashvars_testkit::{Harness, MockSource, custom_var, query_var};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn add_rename_and_remove() {
    let h = Harness::new(MockSource::new().answer("apps.*", &["web"]));
    h.srv.init(vec![query_var("app", "apps.*")]).await.unwrap();

    h.srv.add_variable(query_var("server", "$app.*")).unwrap();
    assert_eq!(h.srv.dependencies_of("server"), vec!["app"]);
    assert_eq!(h.srv.dependents_of("app"), vec!["server"]);
    // added variables are not resolved until asked
    assert!(h.variable("server").options().is_empty());

    let err = h.srv.add_variable(custom_var("app", "x")).unwrap_err();
    let EngineError::Variable(err) = err else {
        panic!("expected a variable error");
    };
    assert_eq!(err.kind, VariableErrorKind::DuplicateName);

    let err = h.srv.rename_variable("server", "__server").unwrap_err();
    assert_eq!(err.failures()[0].kind, VariableErrorKind::InvalidName);
    h.srv.rename_variable("server", "host").unwrap();
    assert_eq!(h.srv.templates().names(), vec!["app", "host"]);

    let removed = h.srv.remove_variable("host").unwrap();
    assert_eq!(removed.name(), "host");
    assert!(matches!(
        h.srv.remove_variable("host"),
        Err(EngineError::UnknownVariable(_))
    ));
}

#[tokio::test]
async fn save_model_drops_resolved_options() {
    let h = Harness::new(MockSource::new().answer("apps.*", &["web", "db"]));
    h.srv
        .init(vec![query_var("app", "apps.*"), custom_var("env", "prod,dev")])
        .await
        .unwrap();

    let saved = h.srv.save_model_json().unwrap();
    assert_eq!(saved[0]["name"], json!("app"));
    assert_eq!(saved[0]["options"], json!([]));
    assert_eq!(saved[0]["current"], json!({ "text": "web", "value": "web" }));
    assert_eq!(saved[1]["options"][0], json!({ "text": "prod", "value": "prod", "selected": false }));

    // the saved model loads back into an equivalent dashboard
    let reloaded = parse_variables(&saved.to_string()).unwrap();
    assert_eq!(reloaded, h.srv.save_model());
}
