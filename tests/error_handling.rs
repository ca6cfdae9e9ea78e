// tests/error_handling.rs

use std::error::Error;
use std::io::Write;

use tempfile::NamedTempFile;

use seedflow::config::load_and_validate;
use seedflow::errors::SeedflowError;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(contents: &str) -> Result<NamedTempFile, Box<dyn Error>> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn config_error(contents: &str) -> Result<String, Box<dyn Error>> {
    let file = write_config(contents)?;
    match load_and_validate(file.path()) {
        Err(SeedflowError::ConfigError(msg)) => Ok(msg),
        Err(other) => Err(format!("expected a configuration error, got {other}").into()),
        Ok(_) => Err("expected a configuration error, got a valid file".into()),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_and_validate("/definitely/not/here/Seedflow.toml").unwrap_err();
    assert!(matches!(err, SeedflowError::IoError(_)), "{err}");
}

#[test]
fn malformed_toml_is_a_parse_error() -> TestResult {
    let file = write_config("[workflow.a\non = ")?;
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, SeedflowError::TomlError(_)), "{err}");
    Ok(())
}

#[test]
fn unknown_keys_are_rejected() -> TestResult {
    let file = write_config(
        r#"
        [workflow.a]
        on = "torrent_finished"
        when = "always"
        "#,
    )?;
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, SeedflowError::TomlError(_)), "{err}");
    Ok(())
}

#[test]
fn file_without_workflows_is_rejected() -> TestResult {
    let msg = config_error("[config]\nmax_active_runners = 2\n")?;
    assert!(msg.contains("at least one"), "{msg}");
    Ok(())
}

#[test]
fn zero_limits_are_rejected() -> TestResult {
    let msg = config_error(
        r#"
        [config]
        max_active_runners = 0

        [workflow.a]
        on = "torrent_finished"
        "#,
    )?;
    assert!(msg.contains("max_active_runners"), "{msg}");

    let msg = config_error(
        r#"
        [config]
        pending_queue_length = 0

        [workflow.a]
        on = "torrent_finished"
        "#,
    )?;
    assert!(msg.contains("pending_queue_length"), "{msg}");
    Ok(())
}

#[test]
fn bad_timeout_is_rejected() -> TestResult {
    let msg = config_error(
        r#"
        [config]
        action_timeout = "soon"

        [workflow.a]
        on = "torrent_finished"
        "#,
    )?;
    assert!(msg.contains("action_timeout"), "{msg}");
    Ok(())
}

#[test]
fn unknown_event_kind_names_the_workflow() -> TestResult {
    let file = write_config(
        r#"
        [workflow.typo]
        on = ["torrent_finished", "torrent_finishd"]
        "#,
    )?;
    match load_and_validate(file.path()) {
        Err(SeedflowError::UnknownEventKind(msg)) => {
            assert!(msg.contains("torrent_finishd"), "{msg}");
            assert!(msg.contains("typo"), "{msg}");
        }
        other => panic!("unexpected result {other:?}"),
    }
    Ok(())
}

#[test]
fn empty_trigger_list_is_rejected() -> TestResult {
    let msg = config_error(
        r#"
        [workflow.a]
        on = []
        "#,
    )?;
    assert!(msg.contains("empty `on`"), "{msg}");
    Ok(())
}

#[test]
fn conditions_need_exactly_one_valid_operator() -> TestResult {
    let msg = config_error(
        r#"
        [workflow.a]
        on = "torrent_finished"
        filter = [ { field = "torrent.name", glob = "*.mkv", regex = "mkv$" } ]
        "#,
    )?;
    assert!(msg.contains("found 2"), "{msg}");

    let msg = config_error(
        r#"
        [workflow.a]
        on = "torrent_finished"
        filter = [ { field = "torrent.name" } ]
        "#,
    )?;
    assert!(msg.contains("found 0"), "{msg}");

    let msg = config_error(
        r#"
        [workflow.a]
        on = "torrent_finished"
        filter = [ { field = "torrent.name", regex = "(unclosed" } ]
        "#,
    )?;
    assert!(msg.contains("torrent.name"), "{msg}");
    Ok(())
}

#[test]
fn actions_need_a_builder_name() -> TestResult {
    let msg = config_error(
        r#"
        [workflow.a]
        on = "torrent_finished"
        actions = [ { use = "log", message = "ok" }, { use = " " } ]
        "#,
    )?;
    assert!(msg.contains("action 1"), "{msg}");
    Ok(())
}

#[test]
fn unknown_builders_load_fine() -> TestResult {
    let file = write_config(
        r#"
        [workflow.a]
        on = "torrent_finished"
        actions = [ { use = "not_registered_yet" } ]
        "#,
    )?;
    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.workflows[0].actions().len(), 1);
    Ok(())
}
