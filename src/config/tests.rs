use super::*;
use crate::routing::ClientStrategy;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.origin.base_url.as_str(), "http://127.0.0.1:8080/");
    assert_eq!(settings.edge.generation, DEFAULT_EDGE_GENERATION);
    assert_eq!(settings.edge.rules.api_ttl_secs, 300);
    assert_eq!(settings.client.generation, "cotai-edge-v1.0.0");
    assert_eq!(settings.client.offline_path, "/offline");
    assert_eq!(settings.sync.tag, "background-quotation-sync");
    assert!(settings.cache.enable_response_cache);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.origin.base_url = Some("http://file-origin:8080".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        origin_url: Some("https://origin.internal".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.origin.base_url.host_str(), Some("origin.internal"));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn response_cache_can_be_disabled_via_cli() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        cache_response_enabled: Some(false),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(!settings.cache.enable_response_cache);
}

#[test]
fn rejects_non_http_origin() {
    let mut raw = RawSettings::default();
    raw.origin.base_url = Some("ftp://origin".to_string());

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "origin.base_url",
            ..
        }
    ));
}

#[test]
fn rejects_zero_api_ttl() {
    let mut raw = RawSettings::default();
    raw.edge.api_ttl_secs = 0;

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "edge.api_ttl_secs",
            ..
        }
    ));
}

#[test]
fn manifest_must_precache_offline_page() {
    let mut raw = RawSettings::default();
    raw.client.manifest = Some(vec!["/".to_string(), "/dashboard".to_string()]);

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "client.manifest",
            ..
        }
    ));
}

#[test]
fn invalid_strategy_pattern_is_reported() {
    let mut raw = RawSettings::default();
    raw.client.strategies.stale_while_revalidate = vec!["[".to_string()];

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "client.strategies",
            ..
        }
    ));
}

#[test]
fn custom_strategy_table_is_compiled() {
    let mut raw = RawSettings::default();
    raw.client.strategies.stale_while_revalidate = vec![r"^/reports".to_string()];

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.client.rules.select("/reports/2024"),
        ClientStrategy::StaleWhileRevalidate
    );
    assert_eq!(
        settings.client.rules.select("/dashboard"),
        ClientStrategy::NetworkFirst
    );
}

#[test]
fn blank_generation_is_rejected() {
    let mut raw = RawSettings::default();
    raw.client.generation = Some("   ".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["tiercache"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_classify_arguments() {
    let args = CliArgs::parse_from([
        "tiercache",
        "classify",
        "POST",
        "/api/suppliers",
        "-H",
        "cookie: auth-token=abc",
    ]);

    match args.command.expect("classify command") {
        Command::Classify(classify) => {
            assert_eq!(classify.method, "POST");
            assert_eq!(classify.url, "/api/suppliers");
            assert_eq!(classify.headers, vec!["cookie: auth-token=abc"]);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "tiercache",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--origin-url",
        "http://app:8080",
        "--cache-response-enabled",
        "false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.origin_url.as_deref(),
                Some("http://app:8080")
            );
            assert_eq!(serve.overrides.cache_response_enabled, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}
