//! Dispatcher, session, DID and DTC flows over the wire.

use crate::mock_hw::{reference_key, Bench, HookEvent};
use candiag::config::{DiagSession, DidEntry, SessionMask};
use candiag::profiles::{
    application_config, DID_BLINK_INTERVAL_MS, DID_ENGINE_VERSION, LEVEL_CALIBRATION,
};
use candiag::server::ServerAction;
use candiag::Nrc;

fn bench() -> Bench {
    Bench::new(application_config())
}

// ── Dispatch basics ──────────────────────────────────────────

#[test]
fn unknown_service_is_rejected() {
    let mut b = bench();
    b.expect_nrc(&[0x99], Nrc::ServiceNotSupported);
}

#[test]
fn disabled_service_is_rejected() {
    // The application image carries no routine control.
    let mut b = bench();
    b.expect_nrc(&[0x31, 0x01, 0x02, 0x03], Nrc::ServiceNotSupported);
}

#[test]
fn empty_request_is_ignored() {
    let mut b = bench();
    let (resp, action) = b.request(&[]);
    assert_eq!(resp, None);
    assert_eq!(action, None);
}

#[test]
fn tester_present_echoes() {
    let mut b = bench();
    assert_eq!(b.expect_response(&[0x3E, 0x00]), vec![0x7E, 0x00]);
}

#[test]
fn tester_present_suppressed_is_silent() {
    let mut b = bench();
    let (resp, _) = b.request(&[0x3E, 0x80]);
    assert_eq!(resp, None);
}

// ── Session control ──────────────────────────────────────────

#[test]
fn session_control_reports_timing_parameters() {
    let mut b = bench();
    let resp = b.expect_response(&[0x10, 0x03]);
    assert_eq!(resp, vec![0x50, 0x03, 0x07, 0xD0, 0x00, 0xC8]);
    assert_eq!(b.server.session(), DiagSession::Extended);
    assert_eq!(
        b.hooks.events,
        vec![HookEvent::SessionChange(DiagSession::Extended)]
    );
}

#[test]
fn session_control_suppress_bit_changes_session_silently() {
    let mut b = bench();
    let (resp, _) = b.request(&[0x10, 0x83]);
    assert_eq!(resp, None);
    assert_eq!(b.server.session(), DiagSession::Extended);
}

#[test]
fn unknown_session_subfunction_is_rejected() {
    let mut b = bench();
    b.expect_nrc(&[0x10, 0x07], Nrc::SubFunctionNotSupported);
}

#[test]
fn unreachable_session_is_conditions_not_correct() {
    // SafetySystem is a known session but not in the profile's table.
    let mut b = bench();
    b.expect_nrc(&[0x10, 0x04], Nrc::ConditionsNotCorrect);
}

#[test]
fn short_session_request_is_format_error() {
    let mut b = bench();
    b.expect_nrc(&[0x10], Nrc::IncorrectMessageLengthOrFormat);
}

// ── ECU reset ────────────────────────────────────────────────

#[test]
fn ecu_reset_responds_then_requests_platform_reset() {
    let mut b = bench();
    let (resp, action) = b.request(&[0x11, 0x01]);
    assert_eq!(resp, Some(vec![0x51, 0x01]));
    assert_eq!(
        action,
        Some(ServerAction::Reset(candiag::config::ResetKind::Hard))
    );
}

#[test]
fn unsupported_reset_type_is_rejected() {
    // Soft reset is a valid type but absent from the reset table.
    let mut b = bench();
    b.expect_nrc(&[0x11, 0x03], Nrc::SubFunctionNotSupported);
}

// ── Data identifiers ─────────────────────────────────────────

#[test]
fn read_engine_version_did() {
    let mut b = bench();
    let resp = b.expect_response(&[0x22, 0x20, 0x25]);
    assert_eq!(resp, vec![0x62, 0x20, 0x25, 0, 2, 0, 0]);
}

#[test]
fn unknown_did_is_out_of_range() {
    let mut b = bench();
    b.expect_nrc(&[0x22, 0xBE, 0xEF], Nrc::RequestOutOfRange);
}

#[test]
fn write_did_requires_calibration_access() {
    let mut b = bench();
    b.expect_nrc(&[0x2E, 0x20, 0x26, 44, 1], Nrc::SecurityAccessDenied);
    // The stored value is untouched.
    assert_eq!(
        b.server.did_value(DID_BLINK_INTERVAL_MS),
        Some(&[150, 0][..])
    );
}

#[test]
fn write_did_after_unlock() {
    let mut b = bench();
    let seed = b.expect_response(&[0x27, 0x01])[2..].to_vec();
    let key = reference_key(LEVEL_CALIBRATION, &seed);
    let mut req = vec![0x27, 0x02];
    req.extend_from_slice(&key);
    assert_eq!(b.expect_response(&req), vec![0x67, 0x02]);

    assert_eq!(
        b.expect_response(&[0x2E, 0x20, 0x26, 44, 1]),
        vec![0x6E, 0x20, 0x26]
    );
    // The main loop sees the new calibration value.
    assert_eq!(b.server.did_value(DID_BLINK_INTERVAL_MS), Some(&[44, 1][..]));
}

#[test]
fn write_length_mismatch_never_partially_copies() {
    let mut b = bench();
    let seed = b.expect_response(&[0x27, 0x01])[2..].to_vec();
    let key = reference_key(LEVEL_CALIBRATION, &seed);
    let mut req = vec![0x27, 0x02];
    req.extend_from_slice(&key);
    b.expect_response(&req);

    b.expect_nrc(
        &[0x2E, 0x20, 0x26, 1, 2, 3],
        Nrc::IncorrectMessageLengthOrFormat,
    );
    assert_eq!(
        b.server.did_value(DID_BLINK_INTERVAL_MS),
        Some(&[150, 0][..])
    );
}

#[test]
fn write_to_read_only_did_is_rejected() {
    let mut b = bench();
    b.expect_nrc(
        &[0x2E, 0x20, 0x25, 9, 9, 9, 9],
        Nrc::ConditionsNotCorrect,
    );
    assert_eq!(b.server.did_value(DID_ENGINE_VERSION), Some(&[0, 2, 0, 0][..]));
}

#[test]
fn did_session_gating_matrix() {
    // A DID reachable only in the extended session.
    let mut cfg = application_config();
    let mut initial = heapless::Vec::new();
    initial.extend_from_slice(&[0xAB]).unwrap();
    cfg.dids
        .push(DidEntry {
            id: 0x1111,
            initial,
            write_access: false,
            min_security: 0,
            sessions: SessionMask::empty().with(DiagSession::Extended),
        })
        .ok();
    let mut b = Bench::new(cfg);

    b.expect_nrc(&[0x22, 0x11, 0x11], Nrc::ConditionsNotCorrect);
    b.expect_response(&[0x10, 0x03]);
    assert_eq!(
        b.expect_response(&[0x22, 0x11, 0x11]),
        vec![0x62, 0x11, 0x11, 0xAB]
    );
}

// ── DTC store ────────────────────────────────────────────────

#[test]
fn triggered_dtc_is_reported_with_status() {
    let mut b = bench();
    b.server.set_dtc_status(0, true);

    // reportDTCByStatusMask, confirmed bit
    let resp = b.expect_response(&[0x19, 0x02, 0x08]);
    assert_eq!(resp, vec![0x59, 0x02, 0x09, 0x81, 0x23, 0x9E, 0x09]);

    // reportNumberOfDTCByStatusMask
    let resp = b.expect_response(&[0x19, 0x01, 0x08]);
    assert_eq!(resp, vec![0x59, 0x01, 0x09, 0x01, 0x00, 0x01]);
}

#[test]
fn cleared_dtc_drops_out_of_masked_report() {
    let mut b = bench();
    b.server.set_dtc_status(0, true);
    b.server.set_dtc_status(0, false);

    let resp = b.expect_response(&[0x19, 0x02, 0xFF]);
    assert_eq!(resp, vec![0x59, 0x02, 0x09]);
}

#[test]
fn supported_dtcs_always_listed() {
    let mut b = bench();
    let resp = b.expect_response(&[0x19, 0x0A]);
    assert_eq!(resp, vec![0x59, 0x0A, 0x09, 0x81, 0x23, 0x9E, 0x00]);
}

#[test]
fn unknown_dtc_subfunction_is_rejected() {
    let mut b = bench();
    b.expect_nrc(&[0x19, 0x42], Nrc::SubFunctionNotSupported);
}
