// ── Password resolution ──
//
// A password stored with the broker entry is used as is. A missing one
// comes from MQADMIN_PASSWORD, then from the system keyring entry
// "mqadmin" / "<broker>/<user>".

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use mqadmin_core::{Credentials, SessionConfig};

use crate::ConfigError;

pub const PASSWORD_ENV: &str = "MQADMIN_PASSWORD";
const KEYRING_SERVICE: &str = "mqadmin";

fn keyring_user(broker_key: &str, username: &str) -> String {
    format!("{broker_key}/{username}")
}

/// Resolve the admin password for one broker entry.
pub fn resolve_password(
    broker_key: &str,
    username: &str,
    stored: Option<&SecretString>,
) -> Result<SecretString, ConfigError> {
    resolve_with(
        broker_key,
        stored,
        || std::env::var(PASSWORD_ENV).ok(),
        || {
            keyring::Entry::new(KEYRING_SERVICE, &keyring_user(broker_key, username))
                .and_then(|entry| entry.get_password())
                .ok()
        },
    )
}

pub(crate) fn resolve_with(
    broker_key: &str,
    stored: Option<&SecretString>,
    from_env: impl FnOnce() -> Option<String>,
    from_keyring: impl FnOnce() -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Stored with the broker entry
    if let Some(pw) = stored.filter(|pw| !pw.expose_secret().is_empty()) {
        return Ok(pw.clone());
    }

    // 2. Env var
    if let Some(pw) = from_env().filter(|pw| !pw.is_empty()) {
        debug!(broker = broker_key, "password from environment");
        return Ok(SecretString::from(pw));
    }

    // 3. Keyring
    if let Some(pw) = from_keyring().filter(|pw| !pw.is_empty()) {
        debug!(broker = broker_key, "password from keyring");
        return Ok(SecretString::from(pw));
    }

    Err(ConfigError::NoCredentials {
        broker: broker_key.into(),
    })
}

/// Fill in `config.credentials.password` in place.
pub fn resolve_credentials(config: &mut SessionConfig) -> Result<(), ConfigError> {
    let Credentials { username, password } = &config.credentials;
    let resolved = resolve_password(&config.key, username, Some(password))?;
    config.credentials.password = resolved;
    Ok(())
}

/// Remember `password` in the system keyring for later sessions.
pub fn store_password(broker_key: &str, username: &str, password: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(broker_key, username))?;
    entry.set_password(password)?;
    debug!(broker = broker_key, "stored password in keyring");
    Ok(())
}
