//! Security-access seed/key providers.
//!
//! Two implementations of [`SeedKeyProvider`]:
//!
//! - [`ReferenceSeedKey`]: the historical reversal-with-offset transform.
//!   It is intentionally weak and exists so bench testers and the desktop
//!   key tool agree out of the box. Replace it per deployment.
//! - [`HmacSeedKey`]: HMAC-SHA256 over a shared secret, for deployments
//!   that want an actual keyed transform behind the same port.

use crate::ports::SeedKeyProvider;

// ── Reference transform ──────────────────────────────────────

/// `seed[i] = level + i`, `key[n-1-i] = seed[i] + level`.
///
/// Not a security mechanism; a placeholder with a known desktop
/// counterpart.
pub struct ReferenceSeedKey;

impl SeedKeyProvider for ReferenceSeedKey {
    fn fill_seed(&mut self, level: u8, seed: &mut [u8]) {
        for (i, b) in seed.iter_mut().enumerate() {
            *b = level.wrapping_add(i as u8);
        }
    }

    fn compute_key(&self, level: u8, seed: &[u8], key: &mut [u8]) {
        let n = seed.len().min(key.len());
        for i in 0..n {
            key[n - 1 - i] = seed[i].wrapping_add(level);
        }
    }
}

// ── HMAC-SHA256 transform ────────────────────────────────────

/// Keyed seed/key transform over a pre-shared secret.
///
/// Seeds are derived from an internal counter so that every fresh
/// challenge differs; the expected key is
/// `HMAC-SHA256(psk, seed || level)` truncated to the configured key
/// length.
pub struct HmacSeedKey {
    psk: [u8; 32],
    psk_len: usize,
    counter: u32,
}

impl HmacSeedKey {
    pub fn new(psk: &[u8]) -> Self {
        let mut buf = [0u8; 32];
        let len = psk.len().min(32);
        buf[..len].copy_from_slice(&psk[..len]);
        Self {
            psk: buf,
            psk_len: len,
            counter: 0,
        }
    }

    fn psk(&self) -> &[u8] {
        &self.psk[..self.psk_len]
    }
}

impl SeedKeyProvider for HmacSeedKey {
    fn fill_seed(&mut self, level: u8, seed: &mut [u8]) {
        self.counter = self.counter.wrapping_add(1);
        let mut msg = [0u8; 5];
        msg[..4].copy_from_slice(&self.counter.to_le_bytes());
        msg[4] = level;
        let digest = hmac_sha256::HMAC::mac(msg, self.psk());
        for (i, b) in seed.iter_mut().enumerate() {
            *b = digest[i % digest.len()];
        }
    }

    fn compute_key(&self, level: u8, seed: &[u8], key: &mut [u8]) {
        let mut msg = [0u8; 64];
        let n = seed.len().min(63);
        msg[..n].copy_from_slice(&seed[..n]);
        msg[n] = level;
        let digest = hmac_sha256::HMAC::mac(&msg[..=n], self.psk());
        for (i, b) in key.iter_mut().enumerate() {
            *b = digest[i % digest.len()];
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
