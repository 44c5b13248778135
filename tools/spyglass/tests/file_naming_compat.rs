use serde_json::json;
use spyglass::config::SessionSettings;
use spyglass::dialog::ScriptedDialog;
use spyglass::file_naming::{
    encode_segment, legacy_reference_path, observation_base_path, with_suffix, MAX_NAME_LEN,
    REFERENCE_SUFFIX,
};
use spyglass::runtime::{
    EngineRuntime, FakeFileSystem, FakeProcessRunner, FakeTerminal, FileSystem,
};
use spyglass::{Observation, Session, Verdict};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn session_on(fs: Arc<FakeFileSystem>, test_name: &str) -> Session {
    let runtime = EngineRuntime {
        file_system: fs,
        process_runner: Arc::new(FakeProcessRunner::new()),
        terminal: Arc::new(FakeTerminal::new()),
    };
    let settings = SessionSettings {
        observation_directory: PathBuf::from("/obs"),
        ..SessionSettings::default()
    };
    Session::start_with_runtime(test_name, settings, runtime, Arc::new(ScriptedDialog::new()))
        .expect("start session")
}

#[test]
fn long_test_names_store_under_a_stable_truncated_path() {
    let fs = Arc::new(FakeFileSystem::new());
    let long_case = "c".repeat(150);
    let test_name = format!("suite.{long_case}");

    let mut session = session_on(fs.clone(), &test_name);
    session
        .spy(Some("p"), Observation::new().with("x", json!(1)))
        .expect("spy");
    assert_eq!(session.finish(None).expect("finish"), Verdict::Pass);

    let encoded = encode_segment(&long_case);
    assert_eq!(encoded.len(), MAX_NAME_LEN - 5);
    let expected = PathBuf::from(format!("/obs/suite/{encoded}.json"));
    assert!(fs.exists(&expected), "expected reference at {expected:?}");

    // The same logical test name resolves to the same file on the next run.
    let mut rerun = session_on(fs.clone(), &test_name);
    rerun
        .spy(Some("p"), Observation::new().with("x", json!(1)))
        .expect("spy");
    assert_eq!(rerun.finish(None).expect("finish"), Verdict::Pass);
}

#[test]
fn references_written_under_the_legacy_hash_scheme_are_still_found() {
    let fs = Arc::new(FakeFileSystem::new());
    let long_case = "c".repeat(150);
    let test_name = format!("suite.{long_case}");

    let legacy_path = legacy_reference_path(Path::new("/obs"), &test_name);
    let current_path = with_suffix(
        &observation_base_path(Path::new("/obs"), &test_name),
        REFERENCE_SUFFIX,
    );
    assert_ne!(legacy_path, current_path);

    // A reference recorded by an older release, including a replay pair.
    fs.seed(
        &legacy_path,
        r#"[
    {
        "__record_args__": "",
        "__spy_point__": "compute",
        "arr": [1]
    },
    {
        "__replay_result__": "",
        "__spy_point__": "compute",
        "result": "R"
    }
]
"#,
    );

    // The session resolves the legacy file: replay values load from it.
    let mut session = session_on(fs.clone(), &test_name);
    assert_eq!(session.replay_store_len(), 1);

    // Reconciliation also runs against the legacy file, and acceptance
    // updates it in place rather than inventing a second reference.
    session
        .settings(&spyglass::config::SettingsPatch {
            reconcile_mode: Some(spyglass::reconcile::ReconcileMode::Accept),
            ..spyglass::config::SettingsPatch::default()
        })
        .expect("settings");
    session
        .spy(Some("p"), Observation::new().with("x", json!(1)))
        .expect("spy");
    assert_eq!(session.finish(None).expect("finish"), Verdict::Pass);
    assert!(fs
        .read_to_string(&legacy_path)
        .expect("legacy reference updated")
        .contains("\"x\": 1"));
    assert!(!fs.exists(&current_path));
}
