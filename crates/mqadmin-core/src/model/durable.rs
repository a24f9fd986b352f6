use serde::{Deserialize, Serialize};

/// A durable subscription on a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableInfo {
    pub name: String,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Topic the subscription is attached to.
    pub dest_name: String,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub active: bool,
}

impl DurableInfo {
    /// Durables are addressed by name plus client id.
    pub fn matches(&self, name: &str, client_id: Option<&str>) -> bool {
        self.name == name && self.client_id.as_deref() == client_id
    }
}
