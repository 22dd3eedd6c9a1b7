//! Security access handshake over the wire.

use crate::mock_hw::{reference_key, Bench, HookEvent};
use candiag::config::KeyLockout;
use candiag::profiles::{application_config, LEVEL_PROGRAMMING};
use candiag::Nrc;

fn bench() -> Bench {
    Bench::new(application_config())
}

#[test]
fn seed_then_key_unlocks_level() {
    let mut b = bench();

    let resp = b.expect_response(&[0x27, 0x03]);
    assert_eq!(&resp[..2], &[0x67, 0x03]);
    let seed = resp[2..].to_vec();
    assert_eq!(seed.len(), 6);
    // Reference generator: seed[i] = level + i.
    assert_eq!(seed, vec![3, 4, 5, 6, 7, 8]);

    let mut req = vec![0x27, 0x04];
    req.extend_from_slice(&reference_key(LEVEL_PROGRAMMING, &seed));
    assert_eq!(b.expect_response(&req), vec![0x67, 0x04]);
    assert_eq!(b.server.security_level(), LEVEL_PROGRAMMING);
    assert!(b
        .hooks
        .events
        .contains(&HookEvent::SecurityChange(LEVEL_PROGRAMMING)));
}

#[test]
fn repeated_seed_request_returns_same_seed() {
    let mut b = bench();
    let s1 = b.expect_response(&[0x27, 0x03])[2..].to_vec();
    let s2 = b.expect_response(&[0x27, 0x03])[2..].to_vec();
    assert_eq!(s1, s2);
}

#[test]
fn seed_for_held_level_is_all_zero() {
    let mut b = bench();
    let seed = b.expect_response(&[0x27, 0x03])[2..].to_vec();
    let mut req = vec![0x27, 0x04];
    req.extend_from_slice(&reference_key(LEVEL_PROGRAMMING, &seed));
    b.expect_response(&req);

    let s1 = b.expect_response(&[0x27, 0x03])[2..].to_vec();
    let s2 = b.expect_response(&[0x27, 0x03])[2..].to_vec();
    assert_eq!(s1, vec![0u8; 6]);
    assert_eq!(s2, vec![0u8; 6]);
}

#[test]
fn invalid_key_reports_and_keeps_level() {
    let mut b = bench();
    let _ = b.expect_response(&[0x27, 0x03]);
    b.expect_nrc(&[0x27, 0x04, 0, 0, 0, 0, 0, 0], Nrc::InvalidKey);
    assert_eq!(b.server.security_level(), 0);
    assert_eq!(
        b.hooks.events,
        vec![HookEvent::InvalidKey {
            level: 3,
            attempts: 1
        }]
    );
}

#[test]
fn key_without_seed_is_sequence_error() {
    let mut b = bench();
    b.expect_nrc(&[0x27, 0x04, 0, 0, 0, 0, 0, 0], Nrc::RequestSequenceError);
}

#[test]
fn unknown_security_subfunction_is_rejected() {
    let mut b = bench();
    b.expect_nrc(&[0x27, 0x09], Nrc::SubFunctionNotSupported);
}

#[test]
fn three_mismatches_arm_the_lockout_window() {
    let mut cfg = application_config();
    cfg.key_lockout = KeyLockout {
        max_attempts: 3,
        delay_ms: 2000,
    };
    let mut b = Bench::new(cfg);

    let _ = b.expect_response(&[0x27, 0x03]);
    let bad = [0x27, 0x04, 0, 0, 0, 0, 0, 0];
    b.expect_nrc(&bad, Nrc::InvalidKey);
    b.expect_nrc(&bad, Nrc::InvalidKey);
    b.expect_nrc(&bad, Nrc::ExceededNumberOfAttempts);

    // Window armed: both sides of the handshake refuse.
    b.expect_nrc(&[0x27, 0x03], Nrc::RequiredTimeDelayNotExpired);
    b.expect_nrc(&bad, Nrc::RequiredTimeDelayNotExpired);

    // After the window the handshake completes normally.
    b.clock.advance(2001);
    let seed = b.expect_response(&[0x27, 0x03])[2..].to_vec();
    let mut req = vec![0x27, 0x04];
    req.extend_from_slice(&reference_key(LEVEL_PROGRAMMING, &seed));
    assert_eq!(b.expect_response(&req), vec![0x67, 0x04]);
    assert_eq!(b.server.security_level(), LEVEL_PROGRAMMING);
}

#[test]
fn wrong_key_length_is_format_error() {
    let mut b = bench();
    let _ = b.expect_response(&[0x27, 0x03]);
    b.expect_nrc(&[0x27, 0x04, 1, 2], Nrc::IncorrectMessageLengthOrFormat);
}
