use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    #[default]
    Normal,
    /// Carries admin traffic; never paused from the console.
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Running,
    Paused,
    Quiesced,
    #[default]
    Unknown,
}

/// A connection service on a broker (`jms`, `admin`, `ssljms`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub kind: ServiceKind,
    #[serde(default)]
    pub state: ServiceState,
    #[serde(default)]
    pub min_threads: u32,
    #[serde(default)]
    pub max_threads: u32,
    #[serde(default)]
    pub active_threads: u32,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, kind: ServiceKind, state: ServiceState) -> Self {
        Self {
            name: name.into(),
            port: None,
            kind,
            state,
            min_threads: 0,
            max_threads: 0,
            active_threads: 0,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.kind == ServiceKind::Admin
    }
}
