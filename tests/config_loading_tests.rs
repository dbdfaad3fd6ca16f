//! Config file loading against a real file on disk, exercising the success
//! path that `test_missing_config_fails_fast` (in `cli_output_tests.rs`)
//! leaves uncovered.

use std::io::Write;

use xstreamd::app::Config;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config file");
    file.write_all(contents.as_bytes()).expect("write temp config");
    file
}

#[test]
fn loads_a_minimal_config_with_defaults() {
    let file = write_config("");
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.streams.min_interval_secs, 15);
    assert_eq!(config.streams.default_interval_secs, 60);
    assert_eq!(config.browser.max_handles, 3);
}

#[test]
fn overrides_apply_over_defaults() {
    let file = write_config(
        r#"
[streams]
min_interval_secs = 30
max_interval_secs = 120
default_interval_secs = 45

[browser]
max_handles = 1
"#,
    );
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.streams.min_interval_secs, 30);
    assert_eq!(config.streams.max_interval_secs, 120);
    assert_eq!(config.streams.default_interval_secs, 45);
    assert_eq!(config.browser.max_handles, 1);
}

#[test]
fn rejects_inverted_interval_bounds_from_a_real_file() {
    let file = write_config(
        r#"
[streams]
min_interval_secs = 200
max_interval_secs = 100
"#,
    );
    let err = Config::load(file.path()).unwrap_err();
    assert!(matches!(err, xstreamd::error::Error::Config(_)));
}

#[test]
fn missing_file_surfaces_a_config_error() {
    let err = Config::load("/nonexistent/xstreamd-config-loading-test.toml").unwrap_err();
    assert!(matches!(err, xstreamd::error::Error::Config(_)));
}
