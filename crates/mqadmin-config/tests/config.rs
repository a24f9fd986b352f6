#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use figment::Jail;
use mqadmin_config::{
    Config, ConfigError, Defaults, load_broker_list_file, load_config_from, save_broker_list_file,
    save_config_to,
};
use mqadmin_core::{Credentials, SessionConfig};
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

#[test]
fn missing_file_gives_defaults() {
    Jail::expect_with(|_jail| {
        let config = load_config_from(Path::new("absent.toml")).map_err(|e| e.to_string())?;
        assert_eq!(config, Config::default());
        assert_eq!(config.defaults.timeout, 10);
        assert_eq!(config.defaults.retries, 5);
        assert_eq!(config.defaults.queue_capacity, 4);
        assert_eq!(config.log.level, "info");
        Ok(())
    });
}

#[test]
fn environment_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
                [defaults]
                timeout = 20
                retries = 3
                username = "operator"

                [log]
                level = "warn"
            "#,
        )?;
        jail.set_env("MQADMIN_DEFAULTS__RETRIES", "7");
        jail.set_env("MQADMIN_LOG__JSON", "true");

        let config = load_config_from(Path::new("config.toml")).map_err(|e| e.to_string())?;
        assert_eq!(config.defaults.timeout, 20);
        assert_eq!(config.defaults.retries, 7);
        assert_eq!(config.defaults.username, "operator");
        assert_eq!(config.defaults.reconnect_delay, 5);
        assert_eq!(config.log.level, "warn");
        assert!(config.log.json);
        Ok(())
    });
}

#[test]
fn zero_queue_capacity_is_rejected() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "[defaults]\nqueue_capacity = 0\n")?;
        let err = load_config_from(Path::new("config.toml")).unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref field, .. } if field == "defaults.queue_capacity")
        );
        Ok(())
    });
}

#[test]
fn saved_config_loads_back() {
    // Inside a jail so env overrides from other tests cannot leak in.
    Jail::expect_with(|jail| {
        let path = jail.directory().join("nested").join("config.toml");

        let mut config = Config::default();
        config.defaults.command_deadline = Some(300);
        config.defaults.reconnect_deadline = Some(60);
        config.log.file = Some(jail.directory().join("mqadmin.log"));
        save_config_to(&path, &config).map_err(|e| e.to_string())?;

        assert_eq!(load_config_from(&path).map_err(|e| e.to_string())?, config);
        Ok(())
    });
}

#[test]
fn defaults_translate_to_core_config() {
    let defaults = Defaults {
        retries: 3,
        retry_timeout: 2,
        reconnect: false,
        command_deadline: None,
        ..Defaults::default()
    };

    let controller = defaults.controller_config();
    assert_eq!(controller.queue_capacity, 4);
    assert_eq!(controller.command_deadline, None);

    let session = defaults.session_config("Local", "mq1", 7676);
    assert_eq!(session.address(), "mq1:7676");
    assert_eq!(session.credentials.username, "admin");
    assert_eq!(session.retry.max_retries, 3);
    assert_eq!(session.retry.retry_timeout, Duration::from_secs(2));
    assert_eq!(session.reconnect.attempts(), 1);
}

#[test]
fn missing_broker_list_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let brokers =
        load_broker_list_file(&dir.path().join("brokerlist.properties"), &Defaults::default())
            .unwrap();
    assert!(brokers.is_empty());
}

#[test]
fn broker_list_file_keeps_foreign_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("console").join("brokerlist.properties");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "# written by hand\nwindow.width=800\nbroker.count=0\n").unwrap();

    let mut local = SessionConfig::new("Local", "localhost", 7676)
        .with_credentials(Credentials::new("admin", "secret"));
    local.timeout = Duration::from_millis(2500);
    let remote = SessionConfig::new("Remote: east", "mq.example.net", 7777);
    save_broker_list_file(&path, &[local, remote]).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("window.width=800"));
    assert!(text.contains("broker.count=2"));

    let defaults = Defaults {
        retries: 9,
        ..Defaults::default()
    };
    let brokers = load_broker_list_file(&path, &defaults).unwrap();
    assert_eq!(brokers.len(), 2);
    assert_eq!(brokers[0].key, "Local");
    assert_eq!(brokers[0].timeout, Duration::from_millis(2500));
    assert_eq!(brokers[0].credentials.password.expose_secret(), "secret");
    assert_eq!(brokers[1].key, "Remote: east");
    assert_eq!(brokers[1].address(), "mq.example.net:7777");
    assert_eq!(brokers[1].credentials.password.expose_secret(), "");
    assert!(brokers.iter().all(|b| b.retry.max_retries == 9));
}

#[test]
fn newer_broker_list_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brokerlist.properties");
    std::fs::write(&path, "version=3.0\nbroker.count=0\n").unwrap();

    let err = load_broker_list_file(&path, &Defaults::default()).unwrap_err();
    assert!(matches!(err, ConfigError::BrokerList { .. }));
}
