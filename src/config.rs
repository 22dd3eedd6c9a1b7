//! Server configuration.
//!
//! One [`ServerConfig`] value is built at start-up and handed to
//! [`UdsServer::new`](crate::server::UdsServer::new); it is never mutated
//! afterwards. All descriptor tables are fixed-capacity, so a config is a
//! plain value with no heap behind it.
//!
//! Ready-made deployment profiles live in [`crate::profiles`].

use heapless::Vec;

use crate::flash::FlashLayout;
use crate::server::dtc::{DtcId, DtcStatus};

// ── Table capacities ─────────────────────────────────────────

pub const MAX_SESSIONS: usize = 4;
pub const MAX_RESETS: usize = 4;
pub const MAX_SECURITY_LEVELS: usize = 4;
pub const MAX_DIDS: usize = 16;
pub const MAX_ROUTINES: usize = 8;
pub const MAX_DTCS: usize = 16;

/// Largest DID value this server can hold.
pub const MAX_DID_LEN: usize = 64;
/// Largest routine argument / result record.
pub const MAX_ROUTINE_IO: usize = 64;

/// Security level meaning "nothing unlocked".
pub const SECURITY_LOCKED: u8 = 0;

// ── Diagnostic sessions ──────────────────────────────────────

/// Diagnostic sessions defined by the UDS protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiagSession {
    Default = 0x01,
    Programming = 0x02,
    Extended = 0x03,
    SafetySystem = 0x04,
}

impl DiagSession {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::Default),
            0x02 => Some(Self::Programming),
            0x03 => Some(Self::Extended),
            0x04 => Some(Self::SafetySystem),
            _ => None,
        }
    }

    pub const fn raw(self) -> u8 {
        self as u8
    }
}

/// Set of diagnostic sessions, one bit per session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionMask(u8);

impl SessionMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every session this engine knows about.
    pub const fn all() -> Self {
        Self(0b1111)
    }

    pub const fn with(self, session: DiagSession) -> Self {
        Self(self.0 | 1 << (session.raw() - 1))
    }

    pub const fn contains(self, session: DiagSession) -> bool {
        self.0 & 1 << (session.raw() - 1) != 0
    }
}

// ── ECU reset kinds ──────────────────────────────────────────

/// Reset types defined by the UDS protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResetKind {
    Hard = 0x01,
    KeyOffOn = 0x02,
    Soft = 0x03,
    EnableRapidPowerShutdown = 0x04,
    DisableRapidPowerShutdown = 0x05,
}

impl ResetKind {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::Hard),
            0x02 => Some(Self::KeyOffOn),
            0x03 => Some(Self::Soft),
            0x04 => Some(Self::EnableRapidPowerShutdown),
            0x05 => Some(Self::DisableRapidPowerShutdown),
            _ => None,
        }
    }

    pub const fn raw(self) -> u8 {
        self as u8
    }
}

// ── Enabled-service flag set ─────────────────────────────────

/// One UDS service handled by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    DiagSessionControl,
    EcuReset,
    ReadDtcInfo,
    ReadDataById,
    SecurityAccess,
    WriteDataById,
    RoutineControl,
    RequestDownload,
    TransferData,
    RequestTransferExit,
    TesterPresent,
}

impl Service {
    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// Which services answer at all; everything else is
/// `ServiceNotSupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSet(u16);

impl ServiceSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, service: Service) -> Self {
        Self(self.0 | service.bit())
    }

    pub const fn contains(self, service: Service) -> bool {
        self.0 & service.bit() != 0
    }
}

// ── Descriptor tables ────────────────────────────────────────

/// One reachable diagnostic session.
#[derive(Debug, Clone, Copy)]
pub struct SessionEntry {
    pub session: DiagSession,
    /// Minimum security level required to enter the session.
    pub min_security: u8,
}

/// One supported ECU reset type.
#[derive(Debug, Clone, Copy)]
pub struct ResetEntry {
    pub kind: ResetKind,
    pub min_security: u8,
    pub sessions: SessionMask,
}

/// One seed/key security level pair.
///
/// The seed sub-function doubles as the level value; the key sub-function
/// is always `seed_sub + 1`.
#[derive(Debug, Clone, Copy)]
pub struct SecurityLevelEntry {
    pub seed_sub: u8,
    pub key_sub: u8,
    /// Seed and key length in bytes.
    pub seed_len: u8,
    pub sessions: SessionMask,
}

/// Lockout policy after repeated key mismatches.
#[derive(Debug, Clone, Copy)]
pub struct KeyLockout {
    /// Consecutive mismatches that arm the lockout window.
    pub max_attempts: u8,
    /// Window length during which security access is refused.
    pub delay_ms: u64,
}

impl Default for KeyLockout {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 10_000,
        }
    }
}

/// One data identifier.
#[derive(Debug, Clone)]
pub struct DidEntry {
    pub id: u16,
    /// Start-up value; also fixes the DID's size.
    pub initial: Vec<u8, MAX_DID_LEN>,
    pub write_access: bool,
    pub min_security: u8,
    pub sessions: SessionMask,
}

/// One routine identifier.
#[derive(Debug, Clone, Copy)]
pub struct RoutineEntry {
    pub rid: u16,
    /// Maximum argument bytes accepted by Start.
    pub arg_len: usize,
    /// Fixed result record size returned by Request-Results.
    pub result_len: usize,
    pub min_security: u8,
    pub sessions: SessionMask,
    pub timeout_ms: u64,
}

/// One diagnostic trouble code.
#[derive(Debug, Clone, Copy)]
pub struct DtcEntry {
    pub id: DtcId,
    pub status: DtcStatus,
}

/// Flash download window and gating (bootloader deployment).
#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    pub layout: FlashLayout,
    /// maxNumberOfBlockLength reported by RequestDownload: the longest
    /// TransferData request (SID + BSC + payload) the server accepts.
    pub max_block_len: u16,
    pub min_security: u8,
    pub sessions: SessionMask,
}

/// What entering the programming session means for this image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgrammingEntry {
    /// Transition in place (bootloader: the services are already here).
    InPlace,
    /// Persist a boot flag and reset into the bootloader (application).
    RebootToBootloader,
}

// ── Top-level configuration ──────────────────────────────────

/// Immutable server configuration; see module docs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub services: ServiceSet,

    /// P2_server_max, milliseconds.
    pub p2_server_max_ms: u16,
    /// P2*_server_max, units of 10 ms.
    pub p2_star_server_max_10ms: u16,

    pub sessions: Vec<SessionEntry, MAX_SESSIONS>,
    pub resets: Vec<ResetEntry, MAX_RESETS>,

    pub security_levels: Vec<SecurityLevelEntry, MAX_SECURITY_LEVELS>,
    pub key_lockout: KeyLockout,

    pub dids: Vec<DidEntry, MAX_DIDS>,
    pub routines: Vec<RoutineEntry, MAX_ROUTINES>,

    pub dtcs: Vec<DtcEntry, MAX_DTCS>,
    /// Status bits this server actually maintains.
    pub dtc_availability: DtcStatus,

    pub transfer: Option<TransferConfig>,

    pub startup_session: DiagSession,
    pub startup_security: u8,
    /// Synthesize the positive session-control response for the start-up
    /// session on the first poll (post-reset hand-off).
    pub announce_startup_session: bool,

    pub programming_entry: ProgrammingEntry,
}

impl ServerConfig {
    /// Empty configuration: no services, default session only.
    /// Deployments start from a profile or fill the tables themselves.
    pub fn new() -> Self {
        let mut sessions = Vec::new();
        // A server without its default session is a configuration error.
        sessions
            .push(SessionEntry {
                session: DiagSession::Default,
                min_security: SECURITY_LOCKED,
            })
            .ok();
        Self {
            services: ServiceSet::empty(),
            p2_server_max_ms: 2000,
            p2_star_server_max_10ms: 200,
            sessions,
            resets: Vec::new(),
            security_levels: Vec::new(),
            key_lockout: KeyLockout::default(),
            dids: Vec::new(),
            routines: Vec::new(),
            dtcs: Vec::new(),
            dtc_availability: DtcStatus::standard_availability(),
            transfer: None,
            startup_session: DiagSession::Default,
            startup_security: SECURITY_LOCKED,
            announce_startup_session: false,
            programming_entry: ProgrammingEntry::InPlace,
        }
    }

    /// Session table entry for `session`, if reachable on this server.
    pub fn session_entry(&self, session: DiagSession) -> Option<&SessionEntry> {
        self.sessions.iter().find(|e| e.session == session)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
