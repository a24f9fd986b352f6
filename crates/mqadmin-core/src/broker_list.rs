// ── Broker list record ──
//
// Flat key/value form of the console's broker entries:
//
//   version=2.0
//   broker.count=2
//   broker0.key=Local
//   broker0.userName=admin
//   broker0.attrs.imqBrokerHostName=localhost
//   broker0.attrs.imqBrokerHostPort=7676
//
// Reading and writing the file itself lives in `mqadmin-config`.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::{
    ATTR_HOST, ATTR_PORT, Credentials, DEFAULT_HOST, DEFAULT_PORT, SessionConfig,
};
use crate::error::BrokerListError;

pub type PropertyMap = BTreeMap<String, String>;

/// Version written by this release.
pub const BROKER_LIST_VERSION: &str = "2.0";
/// Oldest version this release reads.
pub const FIRST_BROKER_LIST_VERSION: &str = "2.0";

const PROP_VERSION: &str = "version";
const PROP_COUNT: &str = "broker.count";
const BROKER_PREFIX: &str = "broker";

/// Decode the broker entries in `props`. A missing version is taken to
/// be the current one; a missing or unparsable count means no entries.
pub fn load_broker_list(props: &PropertyMap) -> Result<Vec<SessionConfig>, BrokerListError> {
    if let Some(version) = props.get(PROP_VERSION) {
        check_version(version)?;
    }

    let count = props
        .get(PROP_COUNT)
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(0);
    debug!(count, "loading broker list");

    (0..count).map(|index| load_entry(props, index)).collect()
}

/// Replace every broker entry in `props` with `brokers`. Unrelated keys
/// are left alone.
pub fn save_broker_list(brokers: &[SessionConfig], props: &mut PropertyMap) {
    props.retain(|key, _| key != PROP_VERSION && !is_broker_key(key));
    props.insert(PROP_VERSION.into(), BROKER_LIST_VERSION.into());

    for (index, broker) in brokers.iter().enumerate() {
        let base = format!("{BROKER_PREFIX}{index}.");
        props.insert(format!("{base}key"), broker.key.clone());
        props.insert(
            format!("{base}receiveTimeout"),
            broker.timeout.as_millis().to_string(),
        );
        props.insert(
            format!("{base}userName"),
            broker.credentials.username.clone(),
        );
        let password = broker.credentials.password.expose_secret();
        if !password.is_empty() {
            props.insert(format!("{base}password"), password.to_owned());
        }

        let mut attrs = broker.attrs.clone();
        attrs.insert(ATTR_HOST.into(), broker.host.clone());
        attrs.insert(ATTR_PORT.into(), broker.port.to_string());
        for (name, value) in attrs {
            props.insert(format!("{base}attrs.{name}"), value);
        }
    }
    props.insert(PROP_COUNT.into(), brokers.len().to_string());
}

fn check_version(found: &str) -> Result<(), BrokerListError> {
    let parse = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| BrokerListError::BadVersion {
                value: value.to_owned(),
            })
    };
    let version = parse(found)?;
    if version > parse(BROKER_LIST_VERSION)? {
        return Err(BrokerListError::UnsupportedVersion {
            found: found.to_owned(),
            current: BROKER_LIST_VERSION.into(),
        });
    }
    if version < parse(FIRST_BROKER_LIST_VERSION)? {
        return Err(BrokerListError::VersionTooOld {
            found: found.to_owned(),
            first: FIRST_BROKER_LIST_VERSION.into(),
        });
    }
    Ok(())
}

fn load_entry(props: &PropertyMap, index: usize) -> Result<SessionConfig, BrokerListError> {
    let base = format!("{BROKER_PREFIX}{index}.");
    let get = |suffix: &str| props.get(&format!("{base}{suffix}")).cloned();

    let attrs_prefix = format!("{base}attrs.");
    let mut attrs: BTreeMap<String, String> = props
        .range(attrs_prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&attrs_prefix))
        .map(|(key, value)| (key[attrs_prefix.len()..].to_owned(), value.clone()))
        .collect();

    let host = attrs
        .remove(ATTR_HOST)
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.into());
    let port = match attrs.remove(ATTR_PORT) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u16>()
            .map_err(|_| BrokerListError::InvalidPort { index, value: raw })?,
        _ => DEFAULT_PORT,
    };

    let key = get("key")
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| format!("{host}:{port}"));
    let credentials = Credentials::new(
        get("userName").unwrap_or_default(),
        get("password").unwrap_or_default(),
    );

    let mut config = SessionConfig::new(key, host, port).with_credentials(credentials);
    config.attrs = attrs;
    if let Some(ms) = get("receiveTimeout").and_then(|raw| raw.trim().parse::<u64>().ok()) {
        if ms > 0 {
            config.timeout = Duration::from_millis(ms);
        }
    }
    Ok(config)
}

fn is_broker_key(key: &str) -> bool {
    key == PROP_COUNT
        || key
            .strip_prefix(BROKER_PREFIX)
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}
