//! Coverage for config parsing, env overrides, validation and paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use switchboard::config::{config_dir, config_path, load_config, Config, CONFIG_ENV};

fn parse(toml_str: &str) -> Config {
    match Config::from_toml(toml_str) {
        Ok(config) => config,
        Err(err) => panic!("config should parse: {err}"),
    }
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

fn validation_error(config: &Config) -> String {
    match config.validate() {
        Ok(()) => panic!("config should be rejected"),
        Err(err) => err.to_string(),
    }
}

const FULL: &str = r#"
[runtime]
data_dir = "/srv/switchboard"
health_interval_secs = 10

[supervisor]
max_restarts = 3
restart_base_delay_ms = 250
grace_period_secs = 2

[[tools]]
name = "search"
command = "search-server"
args = ["--stdio"]
port = 8123
env = { LOG_LEVEL = "debug" }

[forward]
url = "http://127.0.0.1:9000/inbox"
token_env = "AGENT_TOKEN"

[vault]
enabled = true
command = "/usr/local/bin/bw"
server_url = "https://vault.example.com"
sync_interval_secs = 120

[[feeds]]
name = "status-page"
url = "http://127.0.0.1:9100/items"
interval_secs = 60
run_immediately = false

[[channels]]
name = "chat"
base_url = "http://127.0.0.1:9200"
batch_limit = 50
channel_ids = ["ops", "dev"]
"#;

#[test]
fn empty_config_uses_defaults() {
    let config = parse("");
    assert_eq!(config.runtime.health_interval_secs, 30);
    assert!(config.runtime.data_dir.is_none());
    assert_eq!(config.supervisor.max_restarts, 5);
    assert_eq!(config.supervisor.restart_base_delay_ms, 1000);
    assert_eq!(config.supervisor.grace_period_secs, 5);
    assert!(config.tools.is_empty());
    assert!(config.forward.url.is_none());
    assert_eq!(config.forward.timeout_secs, 15);
    assert!(!config.vault.enabled);
    assert_eq!(config.vault.command, "bw");
    assert_eq!(config.vault.timeout_secs, 30);
    assert_eq!(config.vault.max_output_bytes, 10 * 1024 * 1024);
    assert_eq!(config.vault.session_env, "BW_SESSION");
    assert!(config.feeds.is_empty());
    assert!(config.channels.is_empty());
    assert!(config.validate().is_ok());
}

#[test]
fn parse_full_config() {
    let config = parse(FULL);
    assert_eq!(config.runtime.data_dir, Some(PathBuf::from("/srv/switchboard")));

    let tool = &config.tools[0];
    assert_eq!(tool.name, "search");
    assert_eq!(tool.args, vec!["--stdio"]);
    assert_eq!(tool.port, Some(8123));
    assert_eq!(tool.env.get("LOG_LEVEL").map(String::as_str), Some("debug"));

    assert_eq!(config.forward.token_env.as_deref(), Some("AGENT_TOKEN"));
    assert!(config.vault.enabled);
    assert_eq!(config.vault.server_url.as_deref(), Some("https://vault.example.com"));
    assert_eq!(config.vault.sync_interval_secs, 120);

    let feed = &config.feeds[0];
    assert_eq!(feed.interval_secs, 60);
    assert!(!feed.run_immediately);
    assert_eq!(feed.seen_cap, 1000);
    assert_eq!(feed.seen_keep, 500);

    let channels = &config.channels[0];
    assert!(channels.run_immediately);
    assert_eq!(channels.interval_secs, 60);
    assert_eq!(channels.batch_limit, 50);
    assert_eq!(
        channels.channel_ids.as_deref(),
        Some(&["ops".to_owned(), "dev".to_owned()][..])
    );
    assert!(config.validate().is_ok());
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(Config::from_toml("[runtime\nhealth_interval_secs = 1").is_err());
    assert!(Config::from_toml("[[feeds]]\nurl = \"http://x\"").is_err(), "name is required");
}

#[test]
fn env_overrides_replace_file_values() {
    let mut config = parse(FULL);
    config.apply_overrides(env_from(&[
        ("SWITCHBOARD_FORWARD_URL", "http://agent:9000/in"),
        ("SWITCHBOARD_TOOLS_DIR", "/opt/tools"),
        ("SWITCHBOARD_VAULT_COMMAND", "vault-cli"),
        ("SWITCHBOARD_VAULT_ENABLED", "no"),
        ("SWITCHBOARD_MAX_RESTARTS", "9"),
        ("SWITCHBOARD_HEALTH_INTERVAL_SECS", "5"),
    ]));

    assert_eq!(config.forward.url.as_deref(), Some("http://agent:9000/in"));
    assert_eq!(config.supervisor.tools_dir, Some(PathBuf::from("/opt/tools")));
    assert_eq!(config.vault.command, "vault-cli");
    assert!(!config.vault.enabled);
    assert_eq!(config.supervisor.max_restarts, 9);
    assert_eq!(config.runtime.health_interval_secs, 5);
}

#[test]
fn invalid_env_overrides_are_ignored() {
    let mut config = parse(FULL);
    config.apply_overrides(env_from(&[
        ("SWITCHBOARD_VAULT_ENABLED", "maybe"),
        ("SWITCHBOARD_MAX_RESTARTS", "lots"),
        ("SWITCHBOARD_HEALTH_INTERVAL_SECS", "-1"),
    ]));

    assert!(config.vault.enabled);
    assert_eq!(config.supervisor.max_restarts, 3);
    assert_eq!(config.runtime.health_interval_secs, 10);
}

#[test]
fn vault_enabled_override_accepts_common_spellings() {
    for value in ["1", "true", "TRUE", "yes"] {
        let mut config = parse("");
        config.apply_overrides(env_from(&[("SWITCHBOARD_VAULT_ENABLED", value)]));
        assert!(config.vault.enabled, "{value} should enable the vault");
    }
}

#[test]
fn validate_rejects_duplicate_tool_names() {
    let config = parse(
        r#"
[[tools]]
name = "a"
command = "x"

[[tools]]
name = "a"
command = "y"
"#,
    );
    assert!(validation_error(&config).contains("duplicate tool name 'a'"));
}

#[test]
fn validate_rejects_empty_tool_name() {
    let config = parse("[[tools]]\nname = \" \"\ncommand = \"x\"\n");
    assert!(validation_error(&config).contains("empty name"));
}

#[test]
fn validate_rejects_zero_health_interval() {
    let config = parse("[runtime]\nhealth_interval_secs = 0\n");
    assert!(validation_error(&config).contains("health_interval_secs"));
}

#[test]
fn validate_rejects_colliding_poller_names() {
    let config = parse(
        r#"
[forward]
url = "http://agent/in"

[[feeds]]
name = "news"
url = "http://a"

[[channels]]
name = "news"
base_url = "http://b"
"#,
    );
    assert!(validation_error(&config).contains("duplicate poller name 'news'"));

    let reserved = parse(
        "[forward]\nurl = \"http://agent/in\"\n[[feeds]]\nname = \"health\"\nurl = \"http://a\"\n",
    );
    assert!(validation_error(&reserved).contains("'health'"));
}

#[test]
fn validate_rejects_bad_source_tuning() {
    let zero_interval = parse(
        "[forward]\nurl = \"http://agent/in\"\n[[feeds]]\nname = \"f\"\nurl = \"http://a\"\ninterval_secs = 0\n",
    );
    assert!(validation_error(&zero_interval).contains("zero interval"));

    let keep_over_cap = parse(
        "[forward]\nurl = \"http://agent/in\"\n[[feeds]]\nname = \"f\"\nurl = \"http://a\"\nseen_cap = 10\nseen_keep = 20\n",
    );
    assert!(validation_error(&keep_over_cap).contains("exceeds seen_cap"));

    let zero_batch = parse(
        "[forward]\nurl = \"http://agent/in\"\n[[channels]]\nname = \"c\"\nbase_url = \"http://b\"\nbatch_limit = 0\n",
    );
    assert!(validation_error(&zero_batch).contains("batch_limit"));
}

#[test]
fn validate_requires_forward_url_for_sources() {
    let config = parse("[[feeds]]\nname = \"f\"\nurl = \"http://a\"\n");
    assert!(validation_error(&config).contains("forward.url"));

    let blank = parse("[forward]\nurl = \"  \"\n[[feeds]]\nname = \"f\"\nurl = \"http://a\"\n");
    assert!(validation_error(&blank).contains("forward.url"));
}

#[test]
fn validate_rejects_empty_vault_command_when_enabled() {
    let config = parse("[vault]\nenabled = true\ncommand = \"\"\n");
    assert!(validation_error(&config).contains("vault.command"));

    let disabled = parse("[vault]\ncommand = \"\"\n");
    assert!(disabled.validate().is_ok());
}

#[test]
fn validate_rejects_zero_vault_timings_when_enabled() {
    let zero_timeout = parse("[vault]\nenabled = true\ntimeout_secs = 0\n");
    assert!(validation_error(&zero_timeout).contains("vault.timeout_secs"));

    let zero_sync = parse("[vault]\nenabled = true\nsync_interval_secs = 0\n");
    assert!(validation_error(&zero_sync).contains("vault.sync_interval_secs"));

    let disabled = parse("[vault]\ntimeout_secs = 0\nsync_interval_secs = 0\n");
    assert!(disabled.validate().is_ok());
}

#[test]
fn supervisor_config_defaults_tools_dir_under_data_dir() {
    let config = parse("[supervisor]\nrestart_base_delay_ms = 250\ngrace_period_secs = 2\n");
    let supervisor = config.supervisor_config(Path::new("/data"));
    assert_eq!(supervisor.tools_dir, PathBuf::from("/data/bin"));
    assert_eq!(supervisor.restart_base_delay, Duration::from_millis(250));
    assert_eq!(supervisor.grace_period, Duration::from_secs(2));
    assert_eq!(supervisor.max_restarts, 5);

    let mut explicit = config;
    explicit.supervisor.tools_dir = Some(PathBuf::from("/opt/tools"));
    assert_eq!(
        explicit.supervisor_config(Path::new("/data")).tools_dir,
        PathBuf::from("/opt/tools")
    );
}

#[test]
fn data_dir_prefers_configured_value() {
    let config = parse(FULL);
    match config.data_dir() {
        Ok(dir) => assert_eq!(dir, PathBuf::from("/srv/switchboard")),
        Err(err) => panic!("data dir should resolve: {err}"),
    }
}

#[test]
fn config_path_precedence() {
    let explicit = config_path(
        Some(Path::new("/etc/sb.toml")),
        env_from(&[(CONFIG_ENV, "/env.toml")]),
    );
    assert_eq!(explicit.ok(), Some(PathBuf::from("/etc/sb.toml")));

    let from_env = config_path(None, env_from(&[(CONFIG_ENV, "/env.toml")]));
    assert_eq!(from_env.ok(), Some(PathBuf::from("/env.toml")));

    let fallback = match config_path(None, env_from(&[])) {
        Ok(path) => path,
        Err(err) => panic!("default path should resolve: {err}"),
    };
    assert!(fallback.ends_with(".switchboard/config.toml"));
}

#[test]
fn config_dir_resolves() {
    let path = match config_dir() {
        Ok(path) => path,
        Err(err) => panic!("config dir should resolve: {err}"),
    };
    assert!(path.ends_with(".switchboard"));
}

#[test]
fn load_config_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[runtime]\nhealth_interval_secs = 7\n").expect("write config");

    let config = match load_config(&path) {
        Ok(config) => config,
        Err(err) => panic!("config should load: {err}"),
    };
    assert!(config.runtime.health_interval_secs > 0);
}

#[test]
fn load_config_reports_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("absent.toml");
    match load_config(&missing) {
        Ok(_) => panic!("missing file should fail"),
        Err(err) => assert!(err.to_string().contains("absent.toml")),
    }
}
