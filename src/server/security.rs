//! Security access handler.
//!
//! Seed/key state machine for one server:
//!
//! 1. `RequestSeed(level)` issues a challenge. The seed is latched, so
//!    re-requesting without an intervening `SendKey` returns identical
//!    bytes. Requesting the seed of the already-held level returns an
//!    all-zero seed ("no challenge needed").
//! 2. `SendKey(level)` recomputes the expected key through the
//!    deployment's [`SeedKeyProvider`] and compares byte-for-byte.
//!
//! Consecutive mismatches arm a configurable lockout window during which
//! both operations answer `RequiredTimeDelayNotExpired`. The mismatch
//! counter lives in RAM only; it does not survive a reset.

use heapless::Vec;
use log::{info, warn};

use crate::config::{KeyLockout, SecurityLevelEntry};
use crate::error::Nrc;
use crate::ports::{SeedKeyProvider, ServerHooks};
use crate::time::Clock;

/// Longest seed/key this handler supports.
pub const MAX_SEED_LEN: usize = 16;

pub type SeedBuf = Vec<u8, MAX_SEED_LEN>;

struct PendingSeed {
    level: u8,
    seed: SeedBuf,
}

pub struct SecurityAccess {
    lockout: KeyLockout,
    pending: Option<PendingSeed>,
    mismatches: u8,
    locked_until: Option<u64>,
}

impl SecurityAccess {
    pub fn new(lockout: KeyLockout) -> Self {
        Self {
            lockout,
            pending: None,
            mismatches: 0,
            locked_until: None,
        }
    }

    fn check_lockout(&mut self, clock: &dyn Clock) -> Result<(), Nrc> {
        if let Some(until) = self.locked_until {
            if clock.now_ms() < until {
                return Err(Nrc::RequiredTimeDelayNotExpired);
            }
            self.locked_until = None;
            self.mismatches = 0;
        }
        Ok(())
    }

    /// Handle `RequestSeed` for `entry`. `current_level` is the level the
    /// session manager currently holds.
    pub fn request_seed(
        &mut self,
        entry: &SecurityLevelEntry,
        current_level: u8,
        provider: &mut dyn SeedKeyProvider,
        clock: &dyn Clock,
    ) -> Result<SeedBuf, Nrc> {
        self.check_lockout(clock)?;
        assert!(
            entry.seed_len as usize <= MAX_SEED_LEN,
            "seed length exceeds MAX_SEED_LEN"
        );

        let mut seed = SeedBuf::new();
        seed.resize(entry.seed_len as usize, 0).ok();

        // Already unlocked at this level: all-zero seed, no new challenge.
        if current_level == entry.seed_sub {
            return Ok(seed);
        }

        // Latched seed: a bare re-request does not advance the challenge.
        if let Some(p) = &self.pending {
            if p.level == entry.seed_sub {
                return Ok(p.seed.clone());
            }
        }

        provider.fill_seed(entry.seed_sub, &mut seed);
        self.pending = Some(PendingSeed {
            level: entry.seed_sub,
            seed: seed.clone(),
        });
        info!("uds: seed issued for level {}", entry.seed_sub);
        Ok(seed)
    }

    /// Handle `SendKey` for `entry`. Returns the newly granted level.
    pub fn verify_key(
        &mut self,
        entry: &SecurityLevelEntry,
        key: &[u8],
        provider: &dyn SeedKeyProvider,
        clock: &dyn Clock,
        hooks: &mut dyn ServerHooks,
    ) -> Result<u8, Nrc> {
        self.check_lockout(clock)?;

        if key.len() != entry.seed_len as usize {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }

        let Some(p) = &self.pending else {
            // SendKey with no outstanding seed for this level.
            return Err(Nrc::RequestSequenceError);
        };
        if p.level != entry.seed_sub {
            return Err(Nrc::RequestSequenceError);
        }

        let mut expected = SeedBuf::new();
        expected.resize(key.len(), 0).ok();
        provider.compute_key(entry.seed_sub, &p.seed, &mut expected);

        if expected.as_slice() != key {
            self.mismatches = self.mismatches.saturating_add(1);
            warn!(
                "uds: invalid key for level {} (attempt {})",
                entry.seed_sub, self.mismatches
            );
            hooks.on_invalid_key(entry.seed_sub, self.mismatches);
            if self.mismatches >= self.lockout.max_attempts {
                self.locked_until = Some(clock.now_ms() + self.lockout.delay_ms);
                return Err(Nrc::ExceededNumberOfAttempts);
            }
            return Err(Nrc::InvalidKey);
        }

        self.pending = None;
        self.mismatches = 0;
        Ok(entry.seed_sub)
    }
}

// ── Tests ────────────────────────────────────────────────────
