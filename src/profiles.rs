//! Ready-made deployment profiles.
//!
//! Two images share the engine. The **application** exposes read/write
//! diagnostics and hands off to the bootloader for reprogramming; the
//! **bootloader** exposes the flash-programming services and the
//! pre-programming routine set. Both profiles are plain values; a
//! deployment may take one as-is or edit the tables before constructing
//! the server.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::config::{
    DiagSession, DidEntry, DtcEntry, KeyLockout, ProgrammingEntry, ResetEntry, ResetKind,
    RoutineEntry, SecurityLevelEntry, ServerConfig, Service, ServiceSet, SessionEntry,
    SessionMask, TransferConfig, SECURITY_LOCKED,
};
use crate::flash::FlashLayout;
use crate::server::dtc::{DtcId, DtcStatus};

// ── Security levels ──────────────────────────────────────────

/// Calibration access (seed sub-function 0x01 / key 0x02).
pub const LEVEL_CALIBRATION: u8 = 0x01;
/// Programming access (seed sub-function 0x03 / key 0x04).
pub const LEVEL_PROGRAMMING: u8 = 0x03;

const SEED_LEN: u8 = 6;

// ── Data identifiers ─────────────────────────────────────────

/// Engine implementation version (read-only).
pub const DID_ENGINE_VERSION: u16 = 0x2025;
/// Status LED blink interval in milliseconds (calibration, writable).
pub const DID_BLINK_INTERVAL_MS: u16 = 0x2026;
/// Flasher fingerprint written by the programming tool (bootloader).
pub const DID_FLASHER_FINGERPRINT: u16 = 0xF15A;

// ── Routine identifiers (bootloader) ─────────────────────────

pub const RID_CHECK_PROG_PRECONDITIONS: u16 = 0x0203;
pub const RID_CHECK_MEMORY: u16 = 0x0202;
pub const RID_ERASE_FLASH: u16 = 0xFF00;
pub const RID_CHECK_PROG_DEPENDENCIES: u16 = 0xFF01;

const ROUTINE_TIMEOUT_MS: u64 = 5000;

// ── Calibration block (application NVM region) ───────────────

/// Calibration values mirrored by [`crate::nvm::NvmMirror`] in the
/// application image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationBlock {
    pub blink_interval_ms: u16,
}

impl Default for CalibrationBlock {
    fn default() -> Self {
        Self {
            blink_interval_ms: 150,
        }
    }
}

// ── Shared table fragments ───────────────────────────────────

fn standard_sessions() -> Vec<SessionEntry, { crate::config::MAX_SESSIONS }> {
    let mut sessions = Vec::new();
    for session in [
        DiagSession::Default,
        DiagSession::Programming,
        DiagSession::Extended,
    ] {
        sessions
            .push(SessionEntry {
                session,
                min_security: SECURITY_LOCKED,
            })
            .ok();
    }
    sessions
}

fn hard_reset_only() -> Vec<ResetEntry, { crate::config::MAX_RESETS }> {
    let mut resets = Vec::new();
    resets
        .push(ResetEntry {
            kind: ResetKind::Hard,
            min_security: SECURITY_LOCKED,
            sessions: SessionMask::all(),
        })
        .ok();
    resets
}

fn standard_security_levels() -> Vec<SecurityLevelEntry, { crate::config::MAX_SECURITY_LEVELS }> {
    let mut levels = Vec::new();
    for seed_sub in [LEVEL_CALIBRATION, LEVEL_PROGRAMMING] {
        levels
            .push(SecurityLevelEntry {
                seed_sub,
                key_sub: seed_sub + 1,
                seed_len: SEED_LEN,
                sessions: SessionMask::all(),
            })
            .ok();
    }
    levels
}

fn did(id: u16, value: &[u8], write_access: bool, min_security: u8) -> DidEntry {
    let mut initial = Vec::new();
    initial.extend_from_slice(value).ok();
    DidEntry {
        id,
        initial,
        write_access,
        min_security,
        sessions: SessionMask::all(),
    }
}

// ── Application profile ──────────────────────────────────────

/// Application image: diagnostics only; entering the programming session
/// persists the boot flag and resets into the bootloader.
pub fn application_config() -> ServerConfig {
    let mut cfg = ServerConfig::new();
    cfg.services = ServiceSet::empty()
        .with(Service::DiagSessionControl)
        .with(Service::TesterPresent)
        .with(Service::EcuReset)
        .with(Service::SecurityAccess)
        .with(Service::ReadDataById)
        .with(Service::WriteDataById)
        .with(Service::ReadDtcInfo);

    cfg.sessions = standard_sessions();
    cfg.resets = hard_reset_only();
    cfg.security_levels = standard_security_levels();
    cfg.key_lockout = KeyLockout::default();

    let default_cal = CalibrationBlock::default();
    cfg.dids.push(did(DID_ENGINE_VERSION, &[0, 2, 0, 0], false, SECURITY_LOCKED)).ok();
    cfg.dids
        .push(did(
            DID_BLINK_INTERVAL_MS,
            &default_cal.blink_interval_ms.to_le_bytes(),
            true,
            LEVEL_CALIBRATION,
        ))
        .ok();

    cfg.dtcs
        .push(DtcEntry {
            id: DtcId::from_u24(0x81_23_9E),
            status: DtcStatus::new(),
        })
        .ok();

    cfg.startup_session = DiagSession::Default;
    cfg.startup_security = SECURITY_LOCKED;
    cfg.programming_entry = ProgrammingEntry::RebootToBootloader;
    cfg
}

// ── Bootloader profile ───────────────────────────────────────

/// Bootloader image: reprogramming services over `layout`'s application
/// region. Starts directly in the programming session with programming
/// access already granted, matching the post-hand-off state.
pub fn bootloader_config(layout: FlashLayout) -> ServerConfig {
    let mut cfg = ServerConfig::new();
    cfg.services = ServiceSet::empty()
        .with(Service::DiagSessionControl)
        .with(Service::TesterPresent)
        .with(Service::EcuReset)
        .with(Service::SecurityAccess)
        .with(Service::ReadDataById)
        .with(Service::WriteDataById)
        .with(Service::RoutineControl)
        .with(Service::RequestDownload)
        .with(Service::TransferData)
        .with(Service::RequestTransferExit);

    cfg.sessions = standard_sessions();
    cfg.resets = hard_reset_only();
    cfg.security_levels = standard_security_levels();
    cfg.key_lockout = KeyLockout::default();

    cfg.dids
        .push(did(DID_FLASHER_FINGERPRINT, &[0, 0, 0], true, LEVEL_PROGRAMMING))
        .ok();

    for (rid, arg_len) in [
        (RID_CHECK_PROG_PRECONDITIONS, 0),
        (RID_ERASE_FLASH, 9),
        (RID_CHECK_MEMORY, 0),
        (RID_CHECK_PROG_DEPENDENCIES, 0),
    ] {
        cfg.routines
            .push(RoutineEntry {
                rid,
                arg_len,
                result_len: 1,
                min_security: if rid == RID_CHECK_PROG_PRECONDITIONS {
                    SECURITY_LOCKED
                } else {
                    LEVEL_PROGRAMMING
                },
                sessions: SessionMask::all(),
                timeout_ms: ROUTINE_TIMEOUT_MS,
            })
            .ok();
    }

    cfg.transfer = Some(TransferConfig {
        layout,
        max_block_len: 130,
        min_security: LEVEL_PROGRAMMING,
        sessions: SessionMask::all(),
    });

    cfg.startup_session = DiagSession::Programming;
    cfg.startup_security = LEVEL_PROGRAMMING;
    cfg.programming_entry = ProgrammingEntry::InPlace;
    cfg
}

// ── Tests ────────────────────────────────────────────────────
