use control_plane::{ConfigError, SystemConfigLoader};

#[test]
fn config_loader_accepts_valid_keys() {
    let input = r#"
[consul]
address = "http://consul.internal:8500"
datacenter = "eu1"
timeout_ms = 2500
[server]
port = 8080
"#;
    let config = SystemConfigLoader::from_str(input).expect("config");
    assert_eq!(config.get_string("consul.address"), "http://consul.internal:8500");
    assert_eq!(config.get_string("consul.datacenter"), "eu1");
    assert_eq!(config.get_number("consul.timeout_ms"), 2500);
    assert_eq!(config.get_number("server.port"), 8080);
}

#[test]
fn missing_keys_fall_back_to_defaults() {
    let config = SystemConfigLoader::from_str("").expect("config");
    assert_eq!(config.get_string("log.level"), "info");
    assert_eq!(config.get_number("server.port"), 3668);
    assert_eq!(config.get_string("consul.admin_token"), "");
}

#[test]
fn config_loader_rejects_unknown_key() {
    let input = r#"
unknown = { value = "x" }
"#;
    let err = SystemConfigLoader::from_str(input).expect_err("error");
    match err {
        ConfigError::UnknownKey(key) => assert_eq!(key, "unknown.value"),
        _ => panic!("expected unknown key error"),
    }
}

#[test]
fn config_loader_rejects_type_mismatch() {
    let input = r#"
server = { port = "x" }
"#;
    let err = SystemConfigLoader::from_str(input).expect_err("error");
    match err {
        ConfigError::TypeMismatch(key, _) => assert_eq!(key, "server.port"),
        _ => panic!("expected type mismatch"),
    }
}

#[test]
fn overrides_are_validated() {
    let mut config = SystemConfigLoader::from_str("").expect("config");
    config.set("consul.admin_token", "secret").expect("set token");
    assert_eq!(config.get_string("consul.admin_token"), "secret");
    assert!(matches!(
        config.set("server.port", "abc"),
        Err(ConfigError::TypeMismatch(_, _))
    ));
    assert!(matches!(
        config.set("server.host", "x"),
        Err(ConfigError::UnknownKey(_))
    ));
}

#[test]
fn default_template_loads_cleanly() {
    let template = SystemConfigLoader::default_template();
    assert!(template.contains("[consul]"));
    let config = SystemConfigLoader::from_str(&template).expect("template parses");
    assert_eq!(config.get_string("consul.datacenter"), "dc1");
    assert_eq!(config.get_number("consul.timeout_ms"), 10000);
}
