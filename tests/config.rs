use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use paper_code_finder::config::{Config, ConfigLoader, RunOverrides};
use paper_code_finder::error::FinderError;

#[test]
fn parse_full_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("paper-code.json");
    fs::write(
        &path,
        r#"{
            "workers": 8,
            "check_paper": true,
            "timeout_secs": 10,
            "rate_limit_cooldown_secs": 5,
            "max_rate_limit_retries": 2,
            "recency_check": false,
            "user_agent": "lab-bot/1.0"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.workers, 8);
    assert!(resolved.check_paper);
    assert!(!resolved.search_web);
    assert_eq!(resolved.timeout, Duration::from_secs(10));
    assert_eq!(resolved.rate_limit_cooldown, Duration::from_secs(5));
    assert_eq!(resolved.max_rate_limit_retries, 2);
    assert!(!resolved.recency_check);
    assert_eq!(resolved.user_agent, "lab-bot/1.0");
}

#[test]
fn missing_explicit_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, FinderError::ConfigRead(_));
}

#[test]
fn malformed_config_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("paper-code.json");
    fs::write(&path, "{ workers: four }").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, FinderError::ConfigParse(_));
}

#[test]
fn cli_flags_layer_over_file_values() {
    let config = Config {
        workers: Some(2),
        search_web: Some(true),
        timeout_secs: Some(90),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config, None).apply(&RunOverrides {
        workers: Some(6),
        check_author: true,
        timeout_secs: Some(15),
        ..RunOverrides::default()
    });

    assert_eq!(resolved.workers, 6);
    assert!(resolved.search_web);
    assert!(resolved.check_author);
    assert_eq!(resolved.timeout, Duration::from_secs(15));
    assert!(resolved.recency_check);
}

#[test]
fn blank_token_is_ignored() {
    let config = Config {
        github_token: Some("   ".to_string()),
        ..Config::default()
    };
    assert_eq!(ConfigLoader::resolve_config(config, None).github_token, None);
}
