use crate::error::{LedgerError, Result};
use crate::qr::{QrEnvelope, QrIntent, QrStatus};
use serde::{Deserialize, Serialize};

/// The persisted side of a QR transfer
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct QrTransfer {
    pub qr_id: String,
    pub sender_address: String,
    pub recipient_group_id: String,
    /// Resolved from the group id at generation; the pre-signed transfer pays it
    pub recipient_address: String,
    pub amount: u64,
    pub envelope: QrEnvelope,
    pub status: QrStatus,
    pub created_at: i64,
    pub scanned_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub verified_at: Option<i64>,
    pub receiver_address: Option<String>,
    pub transaction_hash: Option<String>,
    pub failure: Option<String>,
}

impl QrTransfer {
    pub fn new(intent: &QrIntent, envelope: QrEnvelope) -> QrTransfer {
        QrTransfer {
            qr_id: intent.qr_id.clone(),
            sender_address: intent.sender_address.clone(),
            recipient_group_id: intent.recipient_group_id.clone(),
            recipient_address: intent.transaction.get_to().to_string(),
            amount: intent.amount,
            envelope,
            status: QrStatus::Generated,
            created_at: intent.timestamp,
            scanned_at: None,
            completed_at: None,
            verified_at: None,
            receiver_address: None,
            transaction_hash: None,
            failure: None,
        }
    }

    /// Copy of this record moved to `next`, stamped at `now`. The stored
    /// record is untouched until the caller swaps it in.
    pub fn advance(&self, next: QrStatus, now: i64) -> Result<QrTransfer> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::StateTransition(format!(
                "QR transfer {} cannot move from {} to {next}",
                self.qr_id, self.status
            )));
        }

        let mut updated = self.clone();
        updated.status = next;
        match next {
            QrStatus::Scanned => updated.scanned_at = Some(now),
            QrStatus::Completed => updated.completed_at = Some(now),
            QrStatus::Verified => updated.verified_at = Some(now),
            _ => {}
        }
        Ok(updated)
    }

    /// Only transfers nobody has paid yet can run out of time
    pub fn is_expired(&self, now: i64, ttl_secs: u64) -> bool {
        let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        matches!(self.status, QrStatus::Generated | QrStatus::Scanned)
            && now.saturating_sub(self.created_at) > ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::sample_qr_transfer;

    #[test]
    fn test_advance_stamps_times() {
        let record = sample_qr_transfer();
        let scanned = record.advance(QrStatus::Scanned, 10).unwrap();
        let completed = scanned.advance(QrStatus::Completed, 20).unwrap();

        assert_eq!(record.status, QrStatus::Generated);
        assert_eq!(scanned.scanned_at, Some(10));
        assert_eq!(completed.completed_at, Some(20));
        assert_eq!(completed.status, QrStatus::Completed);
    }

    #[test]
    fn test_advance_refuses_skips() {
        let record = sample_qr_transfer();
        assert!(matches!(
            record.advance(QrStatus::Completed, 10),
            Err(LedgerError::StateTransition(_))
        ));
    }

    #[test]
    fn test_expiry_window() {
        let record = sample_qr_transfer();
        let created = record.created_at;

        assert!(!record.is_expired(created + 60_000, 60));
        assert!(record.is_expired(created + 60_001, 60));

        let completed = record
            .advance(QrStatus::Scanned, created)
            .and_then(|r| r.advance(QrStatus::Completed, created))
            .unwrap();
        assert!(!completed.is_expired(created + 1_000_000, 60));
    }
}
