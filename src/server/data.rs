//! Data identifier store.
//!
//! Owns the byte value behind every configured DID. Session and security
//! gating happens in the dispatcher before these methods run; the store
//! enforces the write policy itself: writes need `write_access` and a
//! length that matches the configured size exactly. A mismatched length
//! never partially copies.
//!
//! Values written here are read back by the integrator's main loop
//! through [`DataStore::value`] (e.g. a calibration interval consumed by
//! the LED blinker), replacing the aliased configuration buffers of older
//! designs.

use heapless::Vec;
use log::info;

use crate::config::{DidEntry, SessionMask, MAX_DIDS, MAX_DID_LEN};
use crate::error::Nrc;

/// One DID with its live value and access policy.
#[derive(Debug, Clone)]
pub struct DidRecord {
    pub id: u16,
    pub value: Vec<u8, MAX_DID_LEN>,
    pub write_access: bool,
    pub min_security: u8,
    pub sessions: SessionMask,
}

pub struct DataStore {
    records: Vec<DidRecord, MAX_DIDS>,
}

impl DataStore {
    pub fn new(entries: &[DidEntry]) -> Self {
        let mut records = Vec::new();
        for e in entries {
            records
                .push(DidRecord {
                    id: e.id,
                    value: e.initial.clone(),
                    write_access: e.write_access,
                    min_security: e.min_security,
                    sessions: e.sessions,
                })
                .ok();
        }
        Self { records }
    }

    pub fn record(&self, id: u16) -> Option<&DidRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Current value of a DID, for integrator code.
    pub fn value(&self, id: u16) -> Option<&[u8]> {
        self.record(id).map(|r| r.value.as_slice())
    }

    /// Write `bytes` into `id`. Gating beyond session/security:
    /// the DID must be writable and `bytes` must match its size exactly.
    pub fn write(&mut self, id: u16, bytes: &[u8]) -> Result<(), Nrc> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(Nrc::RequestOutOfRange)?;
        if !record.write_access {
            return Err(Nrc::ConditionsNotCorrect);
        }
        if bytes.len() != record.value.len() {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        record.value.clear();
        record.value.extend_from_slice(bytes).ok();
        info!("uds: DID {:#06x} written ({} bytes)", id, bytes.len());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────
