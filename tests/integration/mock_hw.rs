//! Mock collaborators for integration tests.
//!
//! Records every transport frame and flash operation so tests can assert
//! on full histories without touching real CAN or flash registers.

use candiag::config::ServerConfig;
use candiag::flash::{FlashLayout, FlashPort};
use candiag::ports::{IsoTpTransport, RoutineHandler, ServerHooks};
use candiag::seedkey::ReferenceSeedKey;
use candiag::server::routine::{RoutinePoll, RoutineState};
use candiag::server::{ServerAction, ServerEnv, UdsServer};
use candiag::time::ManualClock;
use candiag::{FlashError, TransportError};

use std::collections::VecDeque;

// ── Mock ISO-TP transport ─────────────────────────────────────

pub struct MockTransport {
    pub sent: Vec<Vec<u8>>,
    rx: VecDeque<Vec<u8>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            rx: VecDeque::new(),
        }
    }

    /// Drain everything the server transmitted since the last call.
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }
}

impl IsoTpTransport for MockTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.sent.push(data.to_vec());
        Ok(())
    }

    fn poll(&mut self) {}

    fn receive(&mut self, buf: &mut [u8]) -> Option<usize> {
        let frame = self.rx.pop_front()?;
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Some(n)
    }

    fn on_frame(&mut self, data: &[u8]) {
        // The mock link needs no reassembly; every frame arrives whole.
        self.rx.push_back(data.to_vec());
    }
}

// ── In-memory flash ──────────────────────────────────────────

pub struct RamFlash {
    layout: FlashLayout,
    pub bytes: Vec<u8>,
    pub locked: bool,
    pub erases: Vec<u32>,
    pub programs: u32,
}

#[allow(dead_code)]
impl RamFlash {
    pub fn new(layout: FlashLayout) -> Self {
        let total = layout.bootloader_len + layout.app_len + layout.nvm_len;
        Self {
            layout,
            bytes: vec![0xFF; total as usize],
            locked: true,
            erases: Vec::new(),
            programs: 0,
        }
    }

    fn offset(&self, addr: u32) -> usize {
        (addr - self.layout.base) as usize
    }

    pub fn read_bytes(&self, addr: u32, len: usize) -> &[u8] {
        let off = self.offset(addr);
        &self.bytes[off..off + len]
    }
}

impl FlashPort for RamFlash {
    fn unlock(&mut self) -> Result<(), FlashError> {
        self.locked = false;
        Ok(())
    }

    fn lock(&mut self) {
        self.locked = true;
    }

    fn erase_page(&mut self, page_index: u32) -> Result<(), FlashError> {
        if self.locked {
            return Err(FlashError::Locked);
        }
        self.erases.push(page_index);
        let start = (page_index * self.layout.page_size) as usize;
        let end = start + self.layout.page_size as usize;
        self.bytes[start..end].fill(0xFF);
        Ok(())
    }

    fn program_dword(&mut self, addr: u32, value: u64) -> Result<(), FlashError> {
        if self.locked {
            return Err(FlashError::Locked);
        }
        self.programs += 1;
        let off = self.offset(addr);
        self.bytes[off..off + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn read_dword(&self, addr: u32) -> u64 {
        let off = self.offset(addr);
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.bytes[off..off + 8]);
        u64::from_le_bytes(b)
    }

    fn read(&self, addr: u32, buf: &mut [u8]) {
        let off = self.offset(addr);
        buf.copy_from_slice(&self.bytes[off..off + buf.len()]);
    }
}

// ── Recording hooks ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    SessionChange(candiag::config::DiagSession),
    SecurityChange(u8),
    InvalidKey { level: u8, attempts: u8 },
}

pub struct RecordingHooks {
    pub events: Vec<HookEvent>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }
}

impl ServerHooks for RecordingHooks {
    fn on_session_change(&mut self, session: candiag::config::DiagSession) {
        self.events.push(HookEvent::SessionChange(session));
    }

    fn on_security_change(&mut self, level: u8) {
        self.events.push(HookEvent::SecurityChange(level));
    }

    fn on_invalid_key(&mut self, level: u8, attempts: u8) {
        self.events.push(HookEvent::InvalidKey { level, attempts });
    }
}

// ── Scripted routine bodies ──────────────────────────────────

/// Two-step bodies for every configured RID: Start -> Running on the
/// first poll, Running -> Done (result `0x55`) on the second. With
/// `stuck` set the body reports Running forever, for timeout tests.
pub struct ScriptedRoutines {
    pub stuck: bool,
    pub invocations: u32,
}

#[allow(dead_code)]
impl ScriptedRoutines {
    pub fn new() -> Self {
        Self {
            stuck: false,
            invocations: 0,
        }
    }
}

impl RoutineHandler for ScriptedRoutines {
    fn run(&mut self, ctx: &mut RoutinePoll<'_>) {
        self.invocations += 1;
        match *ctx.state {
            RoutineState::Start => *ctx.state = RoutineState::Running,
            RoutineState::Running if !self.stuck => {
                if !ctx.result.is_empty() {
                    ctx.result[0] = 0x55;
                }
                *ctx.state = RoutineState::Done;
            }
            _ => {}
        }
    }
}

// ── Test bench ───────────────────────────────────────────────

/// One server plus a full set of mock collaborators.
pub struct Bench {
    pub server: UdsServer,
    pub transport: MockTransport,
    pub clock: ManualClock,
    pub seedkey: ReferenceSeedKey,
    pub hooks: RecordingHooks,
    pub routines: ScriptedRoutines,
    pub flash: Option<RamFlash>,
}

#[allow(dead_code)]
impl Bench {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            server: UdsServer::new(config),
            transport: MockTransport::new(),
            clock: ManualClock::new(),
            seedkey: ReferenceSeedKey,
            hooks: RecordingHooks::new(),
            routines: ScriptedRoutines::new(),
            flash: None,
        }
    }

    pub fn with_flash(config: ServerConfig, layout: FlashLayout) -> Self {
        let mut bench = Self::new(config);
        bench.flash = Some(RamFlash::new(layout));
        bench
    }

    /// One main-loop cycle.
    pub fn poll(&mut self) -> Option<ServerAction> {
        let mut env = ServerEnv {
            transport: &mut self.transport,
            clock: &self.clock,
            seed_key: &mut self.seedkey,
            hooks: &mut self.hooks,
            routines: &mut self.routines,
            flash: self.flash.as_mut().map(|f| f as &mut dyn FlashPort),
        };
        self.server.poll(&mut env)
    }

    /// Queue one request, run one cycle, return the response frame (if
    /// one was sent) and the terminal action (if one was returned).
    pub fn request(&mut self, req: &[u8]) -> (Option<Vec<u8>>, Option<ServerAction>) {
        self.server.put_request(req);
        let action = self.poll();
        let mut sent = self.transport.take_sent();
        assert!(sent.len() <= 1, "one request produced {} frames", sent.len());
        (sent.pop(), action)
    }

    /// Queue one request and expect exactly one response frame back.
    pub fn expect_response(&mut self, req: &[u8]) -> Vec<u8> {
        let (resp, action) = self.request(req);
        assert_eq!(action, None);
        resp.expect("no response frame")
    }

    /// Queue one request and expect the matching negative response.
    pub fn expect_nrc(&mut self, req: &[u8], nrc: candiag::Nrc) {
        let resp = self.expect_response(req);
        assert_eq!(resp, vec![0x7F, req[0], nrc.code()], "for {req:02X?}");
    }
}

/// Client-side reference key computation (reversal with offset).
#[allow(dead_code)]
pub fn reference_key(level: u8, seed: &[u8]) -> Vec<u8> {
    let n = seed.len();
    let mut key = vec![0u8; n];
    for i in 0..n {
        key[n - 1 - i] = seed[i].wrapping_add(level);
    }
    key
}
