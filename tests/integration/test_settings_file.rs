//! Settings files written by `init` load back with overrides applied.

use kbsearch::Settings;
use kbsearch::search::ServiceOptions;

use crate::common::TestWorkspace;

#[test]
fn test_init_template_loads_as_defaults() {
    let workspace = TestWorkspace::new();
    let path = Settings::init_config_file(workspace.dir.path(), false).unwrap();

    let loaded = Settings::load_from(&path).unwrap();
    let defaults = Settings::default();
    assert_eq!(loaded.search, defaults.search);
    assert_eq!(loaded.index, defaults.index);
    assert_eq!(loaded.chunking, defaults.chunking);

    // A second init without force refuses to overwrite
    assert!(Settings::init_config_file(workspace.dir.path(), false).is_err());
    assert!(Settings::init_config_file(workspace.dir.path(), true).is_ok());
}

#[test]
fn test_file_values_reach_service_options() {
    let workspace = TestWorkspace::new();
    let path = workspace.add_file(
        "settings.toml",
        r#"
[search]
default_k = 5
cache_ttl_secs = 60
rate_limit_requests = 2
retry_max_attempts = 4
retry_base_delay_ms = 10

[index]
nprobe = 3
"#,
    );

    let settings = Settings::load_from(&path).unwrap();
    let options = ServiceOptions::from_settings(&settings);
    assert_eq!(options.default_k, 5);
    assert_eq!(options.cache_ttl.as_secs(), 60);
    assert_eq!(options.rate_limit_requests, 2);
    assert_eq!(options.retry.max_attempts, 4);
    assert_eq!(options.retry.base_delay.as_millis(), 10);
    assert_eq!(options.nprobe, 3);
    // Unset values keep their defaults
    assert_eq!(
        settings.search.rate_limit_window_secs,
        Settings::default().search.rate_limit_window_secs
    );
}
