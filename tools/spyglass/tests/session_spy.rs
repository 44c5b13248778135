use serde_json::json;
use spyglass::config::SessionSettings;
use spyglass::dialog::ScriptedDialog;
use spyglass::runtime::{EngineRuntime, FakeFileSystem, FakeProcessRunner, FakeTerminal};
use spyglass::{MockAgent, Observation, Session, SpyResult, SpyglassError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ── helpers ───────────────────────────────────────────────────────────────────

fn fake_session(test_name: &str) -> (Session, Arc<FakeTerminal>) {
    let terminal = Arc::new(FakeTerminal::new());
    let runtime = EngineRuntime {
        file_system: Arc::new(FakeFileSystem::new()),
        process_runner: Arc::new(FakeProcessRunner::new()),
        terminal: terminal.clone(),
    };
    let settings = SessionSettings {
        observation_directory: PathBuf::from("/obs"),
        ..SessionSettings::default()
    };
    let session = Session::start_with_runtime(
        test_name,
        settings,
        runtime,
        Arc::new(ScriptedDialog::new()),
    )
    .expect("start session");
    (session, terminal)
}

// ── unfiltered spying ─────────────────────────────────────────────────────────

#[test]
fn spy_with_no_agent_returns_none_and_logs_the_tagged_observation() {
    let (mut session, _) = fake_session("suite.case");
    let outcome = session
        .spy(Some("p"), Observation::new().with("x", json!(1)))
        .expect("spy");
    assert!(outcome.result.is_none());

    let log = session.observation_log();
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("\"__spy_point__\": \"p\""));
    assert!(log[0].contains("\"x\": 1"));
}

#[test]
fn observations_print_through_the_terminal() {
    let (mut session, terminal) = fake_session("suite.case");
    session
        .spy(Some("p"), Observation::new().with("x", json!(1)))
        .expect("spy");
    let lines = terminal.lines();
    assert!(lines.iter().any(|l| l.starts_with("Observing: ")));
}

// ── filtered agents ───────────────────────────────────────────────────────────

#[test]
fn filtered_agent_mocks_only_matching_calls() {
    let (mut session, _) = fake_session("suite.case");
    session
        .deploy_agent(
            "p",
            MockAgent::new()
                .filter_eq("x", json!(1))
                .with_result(json!("mocked")),
        )
        .expect("deploy");

    let hit = session
        .spy(Some("p"), Observation::new().with("x", json!(1)))
        .expect("spy");
    assert_eq!(hit.result, SpyResult::Value(json!("mocked")));

    let miss = session
        .spy(Some("p"), Observation::new().with("x", json!(2)))
        .expect("spy");
    assert!(miss.result.is_none());
}

#[test]
fn string_filter_specs_parse_operator_suffixes() {
    let (mut session, _) = fake_session("suite.case");
    let agent = MockAgent::new()
        .with_filter_spec("name__startswith", json!("al"))
        .expect("parse")
        .with_result(json!("matched"));
    session.deploy_agent("p", agent).expect("deploy");

    let hit = session
        .spy(Some("p"), Observation::new().with("name", json!("alice")))
        .expect("spy");
    assert_eq!(hit.result, SpyResult::Value(json!("matched")));

    let miss = session
        .spy(Some("p"), Observation::new().with("name", json!("bob")))
        .expect("spy");
    assert!(miss.result.is_none());
}

#[test]
fn unknown_filter_operator_fails_at_deploy_time() {
    let err = MockAgent::new().with_filter_spec("x__regex", json!("a"));
    assert!(matches!(err, Err(SpyglassError::InvalidConfig(_))));
}

// ── precedence ────────────────────────────────────────────────────────────────

#[test]
fn latest_unfiltered_agent_shadows_all_earlier_ones() {
    let (mut session, _) = fake_session("suite.case");
    for name in ["a1", "a2", "a3"] {
        session
            .deploy_agent("p", MockAgent::new().with_result(json!(name)))
            .expect("deploy");
    }
    let outcome = session
        .spy(Some("p"), Observation::new())
        .expect("spy");
    assert_eq!(outcome.result, SpyResult::Value(json!("a3")));
}

#[test]
fn rejected_filters_fall_back_through_the_stack_in_deployment_order() {
    let (mut session, _) = fake_session("suite.case");
    session
        .deploy_agent("p", MockAgent::new().with_result(json!("a1")))
        .expect("deploy");
    session
        .deploy_agent(
            "p",
            MockAgent::new().filter_eq("x", json!(2)).with_result(json!("a2")),
        )
        .expect("deploy");
    session
        .deploy_agent(
            "p",
            MockAgent::new().filter_eq("x", json!(3)).with_result(json!("a3")),
        )
        .expect("deploy");

    let via_a3 = session
        .spy(Some("p"), Observation::new().with("x", json!(3)))
        .expect("spy");
    assert_eq!(via_a3.result, SpyResult::Value(json!("a3")));

    let via_a2 = session
        .spy(Some("p"), Observation::new().with("x", json!(2)))
        .expect("spy");
    assert_eq!(via_a2.result, SpyResult::Value(json!("a2")));

    let via_a1 = session
        .spy(Some("p"), Observation::new().with("x", json!(9)))
        .expect("spy");
    assert_eq!(via_a1.result, SpyResult::Value(json!("a1")));
}

// ── actions ───────────────────────────────────────────────────────────────────

#[test]
fn doers_observe_the_canonicalized_call() {
    let (mut session, _) = fake_session("suite.case");
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    session
        .deploy_agent(
            "p",
            MockAgent::new().with_doer(move |obs| {
                if obs.get("x") == Some(&json!(1)) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        )
        .expect("deploy");
    session
        .spy(Some("p"), Observation::new().with("x", json!(1)))
        .expect("spy");
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn agent_exception_propagates_but_the_observation_is_kept() {
    let (mut session, _) = fake_session("suite.case");
    session
        .deploy_agent("p", MockAgent::new().with_exception(json!({"kind": "timeout"})))
        .expect("deploy");
    let err = session.spy(Some("p"), Observation::new().with("x", json!(1)));
    match err {
        Err(SpyglassError::AgentException { point, payload }) => {
            assert_eq!(point, "p");
            assert_eq!(payload, json!({"kind": "timeout"}));
        }
        other => panic!("expected agent exception, got {other:?}"),
    }
    assert_eq!(session.observation_log().len(), 1);
}

#[test]
fn an_agent_can_explicitly_decline_with_the_continue_sentinel() {
    let (mut session, _) = fake_session("suite.case");
    session
        .deploy_agent("p", MockAgent::new().with_result(json!("shadowed")))
        .expect("deploy");
    session
        .deploy_agent("p", MockAgent::new().with_result_continue())
        .expect("deploy");
    let outcome = session
        .spy(Some("p"), Observation::new().with("x", json!(1)))
        .expect("spy");
    assert!(outcome.result.is_continue());

    // A declining agent satisfies a mocking-required point while still
    // letting the real computation run.
    let value = spyglass::intercept::spied_call_with_options(
        &mut session,
        "p",
        Observation::new().with("x", json!(1)),
        &spyglass::intercept::PointOptions {
            require_agent_result: true,
            ..spyglass::intercept::PointOptions::default()
        },
        || json!("real"),
    )
    .expect("call");
    assert_eq!(value, json!("real"));
}

#[test]
fn yield_values_ride_alongside_a_none_result() {
    let (mut session, _) = fake_session("suite.case");
    session
        .deploy_agent("p", MockAgent::new().with_yield_value(json!([1, 2])))
        .expect("deploy");
    let outcome = session
        .spy(Some("p"), Observation::new())
        .expect("spy");
    assert!(outcome.result.is_none());
    assert_eq!(outcome.yielded, Some(json!([1, 2])));
}

#[test]
fn formatter_rewrites_only_what_gets_saved() {
    let (mut session, _) = fake_session("suite.case");
    session
        .deploy_agent(
            "p",
            MockAgent::new()
                .with_result_computed(|obs| obs.get("secret").cloned().unwrap_or(json!(null)))
                .with_formatter(|obs| {
                    obs.set("secret", json!("<redacted>"));
                }),
        )
        .expect("deploy");
    let outcome = session
        .spy(Some("p"), Observation::new().with("secret", json!("hunter2")))
        .expect("spy");
    // The action saw the real value; the log got the redacted one.
    assert_eq!(outcome.result, SpyResult::Value(json!("hunter2")));
    assert!(session.observation_log()[0].contains("<redacted>"));
    assert!(!session.observation_log()[0].contains("hunter2"));
}

// ── canonical form in the log ─────────────────────────────────────────────────

#[test]
fn log_entries_have_sorted_keys_and_rounded_floats() {
    let (mut session, _) = fake_session("suite.case");
    session
        .spy(
            Some("p"),
            Observation::new()
                .with("zeta", json!(1))
                .with("alpha", json!(2.718281828)),
        )
        .expect("spy");
    let entry = &session.observation_log()[0];
    let alpha = entry.find("alpha").expect("alpha present");
    let zeta = entry.find("zeta").expect("zeta present");
    assert!(alpha < zeta);
    assert!(entry.contains("2.7183"));
}
