//! QR-mediated transfers
//!
//! A sender pre-authorizes a transfer and hands it over as an encrypted QR
//! payload; the receiver redeems it later. See [`QrProtocol`] for the steps
//! and [`QrStatus`] for the state machine.

pub mod envelope;
pub mod protocol;
pub mod status;
pub mod transfer;

pub use envelope::{QrEnvelope, QrIntent, PAYLOAD_TYPE, PAYLOAD_VERSION};
pub use protocol::{GeneratedQr, QrProtocol, QrVerification, ScannedQr};
pub use status::QrStatus;
pub use transfer::QrTransfer;
