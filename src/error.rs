//! Unified error types for the CanDiag engine.
//!
//! Protocol failures are expressed as [`Nrc`] (UDS negative response
//! codes); collaborator failures get their own enums and are mapped to an
//! `Nrc` at the handler boundary. All variants are `Copy` so they can be
//! threaded through the dispatcher without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Negative response codes
// ---------------------------------------------------------------------------

/// UDS negative response codes emitted by this server (ISO 14229-1).
///
/// Only the codes this engine can actually produce are listed; the full
/// table is much longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Nrc {
    /// Unknown service identifier, or service disabled in configuration.
    ServiceNotSupported = 0x11,
    /// Known service, unknown sub-function.
    SubFunctionNotSupported = 0x12,
    /// Request too short, too long, or with malformed fields.
    IncorrectMessageLengthOrFormat = 0x13,
    /// Session/state precondition failed.
    ConditionsNotCorrect = 0x22,
    /// Service invoked outside its mandatory order.
    RequestSequenceError = 0x24,
    /// Unknown DID/RID, or address/size outside the programmable window.
    RequestOutOfRange = 0x31,
    /// Current security level is below the service's minimum.
    SecurityAccessDenied = 0x33,
    /// SendKey did not match the expected key.
    InvalidKey = 0x35,
    /// Consecutive key mismatches reached the configured limit.
    ExceededNumberOfAttempts = 0x36,
    /// Security access attempted during an active lockout window.
    RequiredTimeDelayNotExpired = 0x37,
    /// RequestDownload rejected (format/window).
    UploadDownloadNotAccepted = 0x70,
    /// Flash erase/program/verify failure.
    GeneralProgrammingFailure = 0x72,
    /// TransferData block sequence counter mismatch.
    WrongBlockSequenceCounter = 0x73,
}

impl Nrc {
    /// Raw wire value of this code.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Nrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceNotSupported => write!(f, "ServiceNotSupported"),
            Self::SubFunctionNotSupported => write!(f, "SubFunctionNotSupported"),
            Self::IncorrectMessageLengthOrFormat => {
                write!(f, "IncorrectMessageLengthOrFormat")
            }
            Self::ConditionsNotCorrect => write!(f, "ConditionsNotCorrect"),
            Self::RequestSequenceError => write!(f, "RequestSequenceError"),
            Self::RequestOutOfRange => write!(f, "RequestOutOfRange"),
            Self::SecurityAccessDenied => write!(f, "SecurityAccessDenied"),
            Self::InvalidKey => write!(f, "InvalidKey"),
            Self::ExceededNumberOfAttempts => write!(f, "ExceededNumberOfAttempts"),
            Self::RequiredTimeDelayNotExpired => write!(f, "RequiredTimeDelayNotExpired"),
            Self::UploadDownloadNotAccepted => write!(f, "UploadDownloadNotAccepted"),
            Self::GeneralProgrammingFailure => write!(f, "GeneralProgrammingFailure"),
            Self::WrongBlockSequenceCounter => write!(f, "WrongBlockSequenceCounter"),
        }
    }
}

// ---------------------------------------------------------------------------
// Flash controller errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Unlock sequence rejected; the controller is still locked.
    Locked,
    /// Page erase reported an error or timed out.
    EraseFailed,
    /// Double-word program reported an error or timed out.
    ProgramFailed,
    /// Readback after programming did not match the written word.
    VerifyFailed,
    /// Address is outside the device's flash.
    OutOfBounds,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => write!(f, "flash locked"),
            Self::EraseFailed => write!(f, "page erase failed"),
            Self::ProgramFailed => write!(f, "program failed"),
            Self::VerifyFailed => write!(f, "readback verify failed"),
            Self::OutOfBounds => write!(f, "address out of bounds"),
        }
    }
}

impl From<FlashError> for Nrc {
    fn from(_: FlashError) -> Self {
        Self::GeneralProgrammingFailure
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Outbound queue never drained; the frame was dropped.
    TxQueueFull,
    /// Response exceeds what the link can segment.
    TooLong,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TxQueueFull => write!(f, "TX queue full"),
            Self::TooLong => write!(f, "response too long for link"),
        }
    }
}
