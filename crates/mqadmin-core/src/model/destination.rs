use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DestType {
    Queue,
    Topic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum DestState {
    Running,
    ConsumersPaused,
    ProducersPaused,
    Paused,
    #[default]
    Unknown,
}

impl DestState {
    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    /// Any form of pause, partial or full.
    pub fn is_paused(self) -> bool {
        matches!(
            self,
            Self::ConsumersPaused | Self::ProducersPaused | Self::Paused
        )
    }
}

/// Which side of a destination a pause applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseKind {
    Consumers,
    Producers,
    #[default]
    All,
}

impl PauseKind {
    /// State a destination ends up in after this pause.
    pub fn resulting_state(self) -> DestState {
        match self {
            Self::Consumers => DestState::ConsumersPaused,
            Self::Producers => DestState::ProducersPaused,
            Self::All => DestState::Paused,
        }
    }
}

/// A physical destination (queue or topic) as last reported by the broker.
///
/// Limits use `-1` for "unlimited", matching what brokers report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationInfo {
    pub name: String,
    pub dest_type: DestType,
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub state: DestState,

    // Limits
    #[serde(default = "unlimited")]
    pub max_messages: i64,
    #[serde(default = "unlimited")]
    pub max_message_bytes: i64,
    #[serde(default = "unlimited")]
    pub max_message_size: i64,
    #[serde(default = "unlimited")]
    pub max_producers: i64,
    #[serde(default = "unlimited")]
    pub max_active_consumers: i64,
    #[serde(default = "unlimited")]
    pub max_failover_consumers: i64,

    // Counts
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub message_bytes: u64,
    #[serde(default)]
    pub consumer_count: u32,
    #[serde(default)]
    pub producer_count: u32,
}

fn unlimited() -> i64 {
    -1
}

impl DestinationInfo {
    pub fn new(name: impl Into<String>, dest_type: DestType) -> Self {
        Self {
            name: name.into(),
            dest_type,
            temporary: false,
            internal: false,
            state: DestState::Running,
            max_messages: unlimited(),
            max_message_bytes: unlimited(),
            max_message_size: unlimited(),
            max_producers: unlimited(),
            max_active_consumers: unlimited(),
            max_failover_consumers: unlimited(),
            message_count: 0,
            message_bytes: 0,
            consumer_count: 0,
            producer_count: 0,
        }
    }

    /// Destinations are addressed by name plus type.
    pub fn matches(&self, name: &str, dest_type: DestType) -> bool {
        self.name == name && self.dest_type == dest_type
    }
}
