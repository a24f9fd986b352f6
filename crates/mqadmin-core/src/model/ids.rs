// ── Identifiers ──
//
// Opaque, copyable ids. Sessions and intents are numbered by the
// controller; nodes by the topology tree that owns them.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

opaque_id!(
    /// One broker entry and its connection.
    SessionId,
    "session"
);
opaque_id!(
    /// A node in the topology tree. Never reused within one tree.
    NodeId,
    "node"
);
opaque_id!(
    /// One submitted intent.
    IntentId,
    "intent"
);
