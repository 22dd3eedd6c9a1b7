//! Port traits: the boundary between the server engine and the platform.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ UdsServer (engine)
//! ```
//!
//! Driven adapters (ISO-TP link, flash controller, seed/key algorithm,
//! integrator hooks, routine bodies) implement these traits. The engine
//! consumes them through [`ServerEnv`](crate::server::ServerEnv), so the
//! protocol core never touches hardware directly and runs unmodified in
//! host-side tests against mocks.

use crate::config::DiagSession;
use crate::error::TransportError;
use crate::server::routine::RoutinePoll;

// ── Frame addressing ─────────────────────────────────────────

/// CAN identifier carrying tester requests (classic 11-bit frame).
pub const UDS_REQUEST_CAN_ID: u32 = 0x760;
/// CAN identifier carrying server responses.
pub const UDS_RESPONSE_CAN_ID: u32 = 0x761;

// ── Segmented transport ──────────────────────────────────────

/// ISO-TP link adapter.
///
/// The engine only ever calls [`send`](Self::send); the main loop drives
/// [`poll`](Self::poll)/[`receive`](Self::receive) and the CAN RX
/// interrupt injects raw frames via [`on_frame`](Self::on_frame).
pub trait IsoTpTransport {
    /// Segment and transmit a full response. May block until the frame
    /// queue has space.
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Drain link-layer timers and retries.
    fn poll(&mut self);

    /// Non-blocking: returns a fully reassembled request copied into
    /// `buf`, or `None` when nothing complete is pending.
    fn receive(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Inject one raw CAN frame from the receive interrupt path. Only
    /// enqueues into the reassembly buffer; never touches server state.
    fn on_frame(&mut self, data: &[u8]);
}

// ── Security seed/key algorithm ──────────────────────────────

/// Pluggable seed/key algorithm.
///
/// The engine stores the issued seed and compares the tester's key
/// byte-for-byte against [`compute_key`](Self::compute_key); the
/// algorithm itself is deployment-specific.
pub trait SeedKeyProvider {
    /// Fill `seed` with the challenge for `level`.
    fn fill_seed(&mut self, level: u8, seed: &mut [u8]);

    /// Compute the key expected for `seed` at `level` into `key`.
    /// `key.len() == seed.len()` is guaranteed by the engine.
    fn compute_key(&self, level: u8, seed: &[u8], key: &mut [u8]);
}

// ── Integrator hooks ─────────────────────────────────────────

/// Notification hooks fired by the engine after state transitions.
///
/// All bodies default to no-ops; deployments override what they need
/// (e.g. the application persists a boot flag on entering the
/// programming session).
pub trait ServerHooks {
    /// The diagnostic session changed.
    fn on_session_change(&mut self, session: DiagSession) {
        let _ = session;
    }

    /// The security level changed after a verified key exchange.
    fn on_security_change(&mut self, level: u8) {
        let _ = level;
    }

    /// A SendKey mismatched. `attempts` counts consecutive mismatches
    /// since the last success; the engine's own lockout window is
    /// configured separately.
    fn on_invalid_key(&mut self, level: u8, attempts: u8) {
        let _ = (level, attempts);
    }
}

/// Hooks implementation that ignores every notification.
pub struct NoHooks;

impl ServerHooks for NoHooks {}

// ── Routine bodies ───────────────────────────────────────────

/// Integrator-supplied routine bodies, addressed by RID.
///
/// The engine calls [`run`](Self::run) once per poll cycle while the
/// routine is in `Start`/`Running`; the body advances the state through
/// the context. A body must leave the system safe between polls; the
/// engine does not roll back side effects on timeout.
pub trait RoutineHandler {
    fn run(&mut self, ctx: &mut RoutinePoll<'_>);
}
