//! Session and security state manager.
//!
//! Tracks the current and previous diagnostic session and security level
//! and answers the two precondition questions every service handler asks
//! before its body runs: is the current session in the service's allowed
//! set, and is the current security level sufficient.
//!
//! Transitions are performed here; the dispatcher fires the integrator
//! hooks afterwards.

use log::info;

use crate::config::{DiagSession, SessionMask, SECURITY_LOCKED};

pub struct SessionSecurity {
    session: DiagSession,
    previous_session: DiagSession,
    level: u8,
    previous_level: u8,
}

impl SessionSecurity {
    pub fn new(startup_session: DiagSession, startup_level: u8) -> Self {
        Self {
            session: startup_session,
            previous_session: startup_session,
            level: startup_level,
            previous_level: startup_level,
        }
    }

    pub fn session(&self) -> DiagSession {
        self.session
    }

    pub fn previous_session(&self) -> DiagSession {
        self.previous_session
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn previous_level(&self) -> u8 {
        self.previous_level
    }

    /// True when the current session is in `allowed`.
    pub fn is_session_allowed(&self, allowed: SessionMask) -> bool {
        allowed.contains(self.session)
    }

    /// True when the current security level satisfies `required`.
    /// `SECURITY_LOCKED` as a requirement means "open to everyone".
    pub fn is_security_sufficient(&self, required: u8) -> bool {
        required == SECURITY_LOCKED || self.level >= required
    }

    pub fn transition_session(&mut self, new: DiagSession) {
        info!("uds: session {:?} -> {:?}", self.session, new);
        self.previous_session = self.session;
        self.session = new;
    }

    pub fn transition_security(&mut self, new: u8) {
        info!("uds: security level {} -> {}", self.level, new);
        self.previous_level = self.level;
        self.level = new;
    }
}

// ── Tests ────────────────────────────────────────────────────
