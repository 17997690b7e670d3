//! Tests for `src/logging.rs`.

use agent_immune::logging::{init_cli, init_production, DEFAULT_FILTER, LOG_FILE_PREFIX};
use tracing_subscriber::EnvFilter;

#[test]
fn host_subscriber_wins_over_production_logging() {
    // Either this call or another test in the process installs the
    // global subscriber; production logging must back off either way.
    let _ = init_cli();

    let tmp = tempfile::tempdir().expect("tempdir");
    let logs_dir = tmp.path().join("state").join("logs");

    let Err(err) = init_production(&logs_dir) else {
        panic!("subscriber already installed");
    };
    assert!(err.to_string().contains("already installed"), "{err}");
    assert!(logs_dir.is_dir(), "logs directory is created before install");
}

#[test]
fn logs_dir_that_is_a_file_is_reported() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let occupied = tmp.path().join("logs");
    std::fs::write(&occupied, b"not a directory").expect("write file");

    let Err(err) = init_production(&occupied) else {
        panic!("logs directory cannot be created over a file");
    };
    assert!(
        err.to_string().contains("failed to create logs directory"),
        "{err}"
    );
}

#[test]
fn default_filter_quiets_sqlx() {
    let filter = EnvFilter::try_new(DEFAULT_FILTER).expect("filter parses");
    let rendered = filter.to_string();
    assert!(rendered.contains("sqlx=warn"), "{rendered}");
    assert!(rendered.contains("info"), "{rendered}");
}

#[test]
fn log_files_are_named_after_the_crate() {
    assert!(LOG_FILE_PREFIX.starts_with("agent-immune"));
    assert!(LOG_FILE_PREFIX.ends_with(".log"));
}
