use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a QR transfer is in the handshake. Status only moves forward:
///
/// ```text
/// GENERATED -> SCANNED -> COMPLETED -> VERIFIED
///     \            \           \
///      +-> EXPIRED  +-> EXPIRED +-> FAILED
/// ```
///
/// Generated and scanned transfers can also fail outright.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QrStatus {
    Generated,
    Scanned,
    Completed,
    Verified,
    Failed,
    Expired,
}

impl QrStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QrStatus::Verified | QrStatus::Failed | QrStatus::Expired)
    }

    pub fn can_transition_to(&self, next: QrStatus) -> bool {
        use QrStatus::*;
        matches!(
            (*self, next),
            (Generated, Scanned)
                | (Scanned, Completed)
                | (Completed, Verified)
                | (Generated | Scanned | Completed, Failed)
                | (Generated | Scanned, Expired)
        )
    }
}

impl fmt::Display for QrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QrStatus::Generated => "GENERATED",
            QrStatus::Scanned => "SCANNED",
            QrStatus::Completed => "COMPLETED",
            QrStatus::Verified => "VERIFIED",
            QrStatus::Failed => "FAILED",
            QrStatus::Expired => "EXPIRED",
        };
        write!(f, "{name}")
    }
}
