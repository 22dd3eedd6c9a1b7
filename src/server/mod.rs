//! UDS server engine.
//!
//! [`UdsServer`] owns all mutable protocol state for one configuration
//! and dispatches reassembled requests through a fixed pipeline:
//!
//! 1. service enabled? (`ServiceNotSupported` otherwise)
//! 2. session / security preconditions for the addressed descriptor
//! 3. handler body
//! 4. response assembly: the dispatcher is the only place a non-success
//!    result becomes a negative response frame, and the only caller of
//!    the transport's `send`.
//!
//! Terminal operations (ECU reset, the application's hand-off into the
//! bootloader's programming session) are returned as [`ServerAction`]
//! values for the outer driver loop to execute; the engine itself never
//! fails to return.

pub mod data;
pub mod dtc;
pub mod routine;
pub mod security;
pub mod session;
pub mod transfer;

use heapless::Vec;
use log::{info, warn};

use crate::config::{
    DiagSession, ProgrammingEntry, ResetKind, ServerConfig, Service, SessionMask,
};
use crate::error::Nrc;
use crate::flash::FlashPort;
use crate::ports::{IsoTpTransport, RoutineHandler, SeedKeyProvider, ServerHooks};
use crate::time::Clock;

use data::DataStore;
use dtc::DtcStore;
use routine::{RoutineEngine, RoutineState};
use security::SecurityAccess;
use session::SessionSecurity;
use transfer::TransferEngine;

// ── Service identifiers ──────────────────────────────────────

/// UDS service identifiers handled by this engine.
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const READ_DTC_INFORMATION: u8 = 0x19;
    pub const READ_DATA_BY_IDENTIFIER: u8 = 0x22;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const WRITE_DATA_BY_IDENTIFIER: u8 = 0x2E;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const TESTER_PRESENT: u8 = 0x3E;

    /// Added to a request SID to form the positive response SID.
    pub const POSITIVE_OFFSET: u8 = 0x40;
    /// First byte of every negative response.
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
}

/// Sub-function bit suppressing the positive response.
const SUPPRESS_POS_RSP: u8 = 0x80;

/// Largest reassembled request (ISO-TP bound).
pub const MAX_REQUEST_LEN: usize = 4095;
/// Largest response frame this engine assembles.
pub const MAX_RESPONSE_LEN: usize = 512;

pub type Response = Vec<u8, MAX_RESPONSE_LEN>;

// ── Terminal outcomes ────────────────────────────────────────

/// Operations the engine cannot perform itself; the driver loop executes
/// them and (by design) does not return to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    /// Perform a platform reset of the requested kind.
    Reset(ResetKind),
    /// Persist the programming-session boot flag and reset into the
    /// bootloader (application deployment only).
    EnterProgramming,
}

// ── Collaborator bundle ──────────────────────────────────────

/// Collaborators threaded through every poll, so the engine holds no
/// platform references of its own.
pub struct ServerEnv<'a> {
    pub transport: &'a mut dyn IsoTpTransport,
    pub clock: &'a dyn Clock,
    pub seed_key: &'a mut dyn SeedKeyProvider,
    pub hooks: &'a mut dyn ServerHooks,
    pub routines: &'a mut dyn RoutineHandler,
    /// Program-memory port; `None` in the application deployment, which
    /// has no transfer services enabled.
    pub flash: Option<&'a mut dyn FlashPort>,
}

// ── Dispatch plumbing ────────────────────────────────────────

/// What a handler produced: an optional positive response plus an
/// optional terminal action.
struct Reply {
    response: Option<Response>,
    action: Option<ServerAction>,
}

impl Reply {
    fn of(response: Response) -> Self {
        Self {
            response: Some(response),
            action: None,
        }
    }

    fn suppressed() -> Self {
        Self {
            response: None,
            action: None,
        }
    }

    fn with_action(mut self, action: ServerAction) -> Self {
        self.action = Some(action);
        self
    }
}

fn service_of(sid: u8) -> Option<Service> {
    match sid {
        service_id::DIAGNOSTIC_SESSION_CONTROL => Some(Service::DiagSessionControl),
        service_id::ECU_RESET => Some(Service::EcuReset),
        service_id::READ_DTC_INFORMATION => Some(Service::ReadDtcInfo),
        service_id::READ_DATA_BY_IDENTIFIER => Some(Service::ReadDataById),
        service_id::SECURITY_ACCESS => Some(Service::SecurityAccess),
        service_id::WRITE_DATA_BY_IDENTIFIER => Some(Service::WriteDataById),
        service_id::ROUTINE_CONTROL => Some(Service::RoutineControl),
        service_id::REQUEST_DOWNLOAD => Some(Service::RequestDownload),
        service_id::TRANSFER_DATA => Some(Service::TransferData),
        service_id::REQUEST_TRANSFER_EXIT => Some(Service::RequestTransferExit),
        service_id::TESTER_PRESENT => Some(Service::TesterPresent),
        _ => None,
    }
}

// ── Server ───────────────────────────────────────────────────

pub struct UdsServer {
    config: ServerConfig,
    state: SessionSecurity,
    security: SecurityAccess,
    dids: DataStore,
    routines: RoutineEngine,
    dtcs: DtcStore,
    transfer: Option<TransferEngine>,
    pending_request: Option<Vec<u8, MAX_REQUEST_LEN>>,
    announce_startup: bool,
}

impl UdsServer {
    pub fn new(config: ServerConfig) -> Self {
        assert!(
            config.session_entry(config.startup_session).is_some(),
            "start-up session missing from session table"
        );
        let state = SessionSecurity::new(config.startup_session, config.startup_security);
        let security = SecurityAccess::new(config.key_lockout);
        let dids = DataStore::new(&config.dids);
        let routines = RoutineEngine::new(&config.routines);
        let dtcs = DtcStore::new(&config.dtcs, config.dtc_availability);
        let transfer = config.transfer.map(TransferEngine::new);
        let announce_startup = config.announce_startup_session;

        Self {
            config,
            state,
            security,
            dids,
            routines,
            dtcs,
            transfer,
            pending_request: None,
            announce_startup,
        }
    }

    // ── Integrator surface ───────────────────────────────────

    pub fn session(&self) -> DiagSession {
        self.state.session()
    }

    pub fn security_level(&self) -> u8 {
        self.state.level()
    }

    /// Current value of a DID, for code outside the protocol path.
    pub fn did_value(&self, id: u16) -> Option<&[u8]> {
        self.dids.value(id)
    }

    /// Set or clear the test-failed/confirmed bits of the DTC at `index`.
    pub fn set_dtc_status(&mut self, index: usize, triggered: bool) {
        self.dtcs.set_status(index, triggered);
    }

    pub fn routine_state(&self, rid: u16) -> Option<RoutineState> {
        self.routines.find(rid).map(|i| self.routines.state(i))
    }

    /// Queue one reassembled request. A request already pending is
    /// replaced; the transport layer delivers one at a time.
    pub fn put_request(&mut self, data: &[u8]) {
        if data.len() > MAX_REQUEST_LEN {
            warn!("uds: oversized request dropped ({} bytes)", data.len());
            return;
        }
        let mut buf = Vec::new();
        buf.extend_from_slice(data).ok();
        self.pending_request = Some(buf);
    }

    /// One main-loop cycle: dispatch a pending request, then advance the
    /// routine engine. Returns a terminal action for the driver, if any.
    pub fn poll(&mut self, env: &mut ServerEnv<'_>) -> Option<ServerAction> {
        if self.announce_startup {
            self.announce_startup = false;
            let resp = self.session_control_response(self.state.session());
            self.send(env, &resp);
        }

        let action = if let Some(req) = self.pending_request.take() {
            self.dispatch(&req, env)
        } else {
            None
        };

        self.routines.poll(env.clock, env.routines);
        action
    }

    // ── Dispatch ─────────────────────────────────────────────

    fn dispatch(&mut self, req: &[u8], env: &mut ServerEnv<'_>) -> Option<ServerAction> {
        let Some(&sid) = req.first() else {
            return None;
        };

        let result = match service_of(sid) {
            Some(service) if self.config.services.contains(service) => match sid {
                service_id::DIAGNOSTIC_SESSION_CONTROL => self.handle_session_control(req, env),
                service_id::ECU_RESET => self.handle_ecu_reset(req),
                service_id::READ_DTC_INFORMATION => self.handle_read_dtc(req),
                service_id::READ_DATA_BY_IDENTIFIER => self.handle_read_did(req),
                service_id::SECURITY_ACCESS => self.handle_security_access(req, env),
                service_id::WRITE_DATA_BY_IDENTIFIER => self.handle_write_did(req),
                service_id::ROUTINE_CONTROL => self.handle_routine_control(req, env),
                service_id::REQUEST_DOWNLOAD => self.handle_request_download(req),
                service_id::TRANSFER_DATA => self.handle_transfer_data(req, env),
                service_id::REQUEST_TRANSFER_EXIT => self.handle_transfer_exit(req, env),
                service_id::TESTER_PRESENT => self.handle_tester_present(req),
                _ => unreachable!(),
            },
            _ => Err(Nrc::ServiceNotSupported),
        };

        match result {
            Ok(reply) => {
                if let Some(resp) = &reply.response {
                    self.send(env, resp);
                }
                reply.action
            }
            Err(nrc) => {
                warn!("uds: {:#04x} rejected: {}", sid, nrc);
                let mut resp = Response::new();
                resp.extend_from_slice(&[service_id::NEGATIVE_RESPONSE, sid, nrc.code()])
                    .ok();
                self.send(env, &resp);
                None
            }
        }
    }

    fn send(&self, env: &mut ServerEnv<'_>, resp: &Response) {
        if let Err(e) = env.transport.send(resp) {
            warn!("uds: response dropped: {}", e);
        }
    }

    /// Session/security gate shared by every descriptor-driven handler.
    fn check_access(&self, sessions: SessionMask, min_security: u8) -> Result<(), Nrc> {
        if !self.state.is_session_allowed(sessions) {
            return Err(Nrc::ConditionsNotCorrect);
        }
        if !self.state.is_security_sufficient(min_security) {
            return Err(Nrc::SecurityAccessDenied);
        }
        Ok(())
    }

    fn session_control_response(&self, session: DiagSession) -> Response {
        let mut resp = Response::new();
        resp.extend_from_slice(&[
            service_id::DIAGNOSTIC_SESSION_CONTROL + service_id::POSITIVE_OFFSET,
            session.raw(),
        ])
        .ok();
        resp.extend_from_slice(&self.config.p2_server_max_ms.to_be_bytes())
            .ok();
        resp.extend_from_slice(&self.config.p2_star_server_max_10ms.to_be_bytes())
            .ok();
        resp
    }

    // ── Handlers ─────────────────────────────────────────────

    fn handle_session_control(
        &mut self,
        req: &[u8],
        env: &mut ServerEnv<'_>,
    ) -> Result<Reply, Nrc> {
        if req.len() != 2 {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        let suppress = req[1] & SUPPRESS_POS_RSP != 0;
        let session = DiagSession::from_raw(req[1] & !SUPPRESS_POS_RSP)
            .ok_or(Nrc::SubFunctionNotSupported)?;
        let entry = self
            .config
            .session_entry(session)
            .ok_or(Nrc::ConditionsNotCorrect)?;
        if !self.state.is_security_sufficient(entry.min_security) {
            return Err(Nrc::SecurityAccessDenied);
        }

        // Application deployment: entering the programming session means
        // handing off to the bootloader. No response is sent; the driver
        // persists the boot flag and resets.
        if session == DiagSession::Programming
            && self.config.programming_entry == ProgrammingEntry::RebootToBootloader
        {
            info!("uds: programming session requested, handing off");
            return Ok(Reply::suppressed().with_action(ServerAction::EnterProgramming));
        }

        self.state.transition_session(session);
        env.hooks.on_session_change(session);

        if suppress {
            return Ok(Reply::suppressed());
        }
        Ok(Reply::of(self.session_control_response(session)))
    }

    fn handle_ecu_reset(&mut self, req: &[u8]) -> Result<Reply, Nrc> {
        if req.len() != 2 {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        let suppress = req[1] & SUPPRESS_POS_RSP != 0;
        let kind = ResetKind::from_raw(req[1] & !SUPPRESS_POS_RSP)
            .ok_or(Nrc::SubFunctionNotSupported)?;
        let entry = self
            .config
            .resets
            .iter()
            .find(|e| e.kind == kind)
            .ok_or(Nrc::SubFunctionNotSupported)?;
        self.check_access(entry.sessions, entry.min_security)?;

        info!("uds: ECU reset ({:?})", kind);
        let action = ServerAction::Reset(kind);
        if suppress {
            return Ok(Reply::suppressed().with_action(action));
        }
        let mut resp = Response::new();
        resp.extend_from_slice(&[
            service_id::ECU_RESET + service_id::POSITIVE_OFFSET,
            kind.raw(),
        ])
        .ok();
        Ok(Reply::of(resp).with_action(action))
    }

    fn handle_tester_present(&mut self, req: &[u8]) -> Result<Reply, Nrc> {
        if req.len() != 2 {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        let suppress = req[1] & SUPPRESS_POS_RSP != 0;
        if req[1] & !SUPPRESS_POS_RSP != 0x00 {
            return Err(Nrc::SubFunctionNotSupported);
        }
        if suppress {
            return Ok(Reply::suppressed());
        }
        let mut resp = Response::new();
        resp.extend_from_slice(&[
            service_id::TESTER_PRESENT + service_id::POSITIVE_OFFSET,
            0x00,
        ])
        .ok();
        Ok(Reply::of(resp))
    }

    fn handle_read_did(&mut self, req: &[u8]) -> Result<Reply, Nrc> {
        if req.len() != 3 {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        let id = u16::from_be_bytes([req[1], req[2]]);
        let record = self.dids.record(id).ok_or(Nrc::RequestOutOfRange)?;
        self.check_access(record.sessions, record.min_security)?;

        let mut resp = Response::new();
        resp.extend_from_slice(&[
            service_id::READ_DATA_BY_IDENTIFIER + service_id::POSITIVE_OFFSET,
            req[1],
            req[2],
        ])
        .ok();
        resp.extend_from_slice(self.dids.value(id).unwrap_or(&[]))
            .ok();
        Ok(Reply::of(resp))
    }

    fn handle_write_did(&mut self, req: &[u8]) -> Result<Reply, Nrc> {
        if req.len() < 3 {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        let id = u16::from_be_bytes([req[1], req[2]]);
        let record = self.dids.record(id).ok_or(Nrc::RequestOutOfRange)?;
        self.check_access(record.sessions, record.min_security)?;

        self.dids.write(id, &req[3..])?;
        let mut resp = Response::new();
        resp.extend_from_slice(&[
            service_id::WRITE_DATA_BY_IDENTIFIER + service_id::POSITIVE_OFFSET,
            req[1],
            req[2],
        ])
        .ok();
        Ok(Reply::of(resp))
    }

    fn handle_security_access(
        &mut self,
        req: &[u8],
        env: &mut ServerEnv<'_>,
    ) -> Result<Reply, Nrc> {
        if req.len() < 2 {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        let sub = req[1];
        let entry = *self
            .config
            .security_levels
            .iter()
            .find(|e| e.seed_sub == sub || e.key_sub == sub)
            .ok_or(Nrc::SubFunctionNotSupported)?;
        if !self.state.is_session_allowed(entry.sessions) {
            return Err(Nrc::ConditionsNotCorrect);
        }

        let mut resp = Response::new();
        resp.extend_from_slice(&[
            service_id::SECURITY_ACCESS + service_id::POSITIVE_OFFSET,
            sub,
        ])
        .ok();

        if sub == entry.seed_sub {
            if req.len() != 2 {
                return Err(Nrc::IncorrectMessageLengthOrFormat);
            }
            let seed = self.security.request_seed(
                &entry,
                self.state.level(),
                env.seed_key,
                env.clock,
            )?;
            resp.extend_from_slice(&seed).ok();
            return Ok(Reply::of(resp));
        }

        // Key sub-function.
        let level =
            self.security
                .verify_key(&entry, &req[2..], env.seed_key, env.clock, env.hooks)?;
        self.state.transition_security(level);
        env.hooks.on_security_change(level);
        Ok(Reply::of(resp))
    }

    fn handle_routine_control(
        &mut self,
        req: &[u8],
        env: &mut ServerEnv<'_>,
    ) -> Result<Reply, Nrc> {
        if req.len() < 4 {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        let sub = req[1];
        let rid = u16::from_be_bytes([req[2], req[3]]);
        let index = self.routines.find(rid).ok_or(Nrc::RequestOutOfRange)?;
        let entry = *self.routines.entry(index);
        self.check_access(entry.sessions, entry.min_security)?;

        let mut resp = Response::new();
        resp.extend_from_slice(&[
            service_id::ROUTINE_CONTROL + service_id::POSITIVE_OFFSET,
            sub,
            req[2],
            req[3],
        ])
        .ok();

        match sub {
            0x01 => {
                self.routines.start(index, &req[4..], env.clock.now_ms())?;
                Ok(Reply::of(resp))
            }
            // Routines here are not stoppable.
            0x02 => Err(Nrc::SubFunctionNotSupported),
            0x03 => {
                let result = self.routines.request_results(index)?;
                resp.extend_from_slice(&result).ok();
                Ok(Reply::of(resp))
            }
            _ => Err(Nrc::SubFunctionNotSupported),
        }
    }

    fn handle_read_dtc(&mut self, req: &[u8]) -> Result<Reply, Nrc> {
        if req.len() < 2 {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        let sub = req[1];
        let avail = self.dtcs.availability().raw();

        let mut resp = Response::new();
        resp.extend_from_slice(&[
            service_id::READ_DTC_INFORMATION + service_id::POSITIVE_OFFSET,
            sub,
            avail,
        ])
        .ok();

        match sub {
            // reportNumberOfDTCByStatusMask
            0x01 => {
                if req.len() != 3 {
                    return Err(Nrc::IncorrectMessageLengthOrFormat);
                }
                let count = self.dtcs.matching(req[2]).count() as u16;
                resp.push(0x01).ok(); // DTCFormatIdentifier: ISO 14229-1
                resp.extend_from_slice(&count.to_be_bytes()).ok();
                Ok(Reply::of(resp))
            }
            // reportDTCByStatusMask
            0x02 => {
                if req.len() != 3 {
                    return Err(Nrc::IncorrectMessageLengthOrFormat);
                }
                for record in self.dtcs.matching(req[2]) {
                    resp.extend_from_slice(&record.id.bytes()).ok();
                    resp.push(record.status.raw()).ok();
                }
                Ok(Reply::of(resp))
            }
            // reportSupportedDTC
            0x0A => {
                if req.len() != 2 {
                    return Err(Nrc::IncorrectMessageLengthOrFormat);
                }
                for record in self.dtcs.iter() {
                    resp.extend_from_slice(&record.id.bytes()).ok();
                    resp.push(record.status.raw()).ok();
                }
                Ok(Reply::of(resp))
            }
            _ => Err(Nrc::SubFunctionNotSupported),
        }
    }

    fn transfer_gate(&self) -> Result<(), Nrc> {
        let cfg = self.config.transfer.as_ref().ok_or(Nrc::ConditionsNotCorrect)?;
        self.check_access(cfg.sessions, cfg.min_security)
    }

    fn handle_request_download(&mut self, req: &[u8]) -> Result<Reply, Nrc> {
        self.transfer_gate()?;
        if req.len() < 3 {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        // dataFormatIdentifier: no compression or encryption supported.
        if req[1] != 0x00 {
            return Err(Nrc::UploadDownloadNotAccepted);
        }
        let size_len = usize::from(req[2] >> 4);
        let addr_len = usize::from(req[2] & 0x0F);
        if !(1..=4).contains(&addr_len) || !(1..=4).contains(&size_len) {
            return Err(Nrc::UploadDownloadNotAccepted);
        }
        if req.len() != 3 + addr_len + size_len {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }

        let addr = be_field(&req[3..3 + addr_len]);
        let size = be_field(&req[3 + addr_len..3 + addr_len + size_len]);

        let engine = self.transfer.as_mut().ok_or(Nrc::ConditionsNotCorrect)?;
        let max_block = engine.request_download(addr, size)?;

        let mut resp = Response::new();
        resp.extend_from_slice(&[
            service_id::REQUEST_DOWNLOAD + service_id::POSITIVE_OFFSET,
            0x20, // lengthFormatIdentifier: 2-byte maxNumberOfBlockLength
        ])
        .ok();
        resp.extend_from_slice(&max_block.to_be_bytes()).ok();
        Ok(Reply::of(resp))
    }

    fn handle_transfer_data(
        &mut self,
        req: &[u8],
        env: &mut ServerEnv<'_>,
    ) -> Result<Reply, Nrc> {
        self.transfer_gate()?;
        if req.len() < 2 {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        let engine = self.transfer.as_mut().ok_or(Nrc::ConditionsNotCorrect)?;
        let flash = env.flash.as_deref_mut().ok_or(Nrc::ConditionsNotCorrect)?;

        let bsc = engine.transfer_data(req[1], &req[2..], flash)?;
        let mut resp = Response::new();
        resp.extend_from_slice(&[
            service_id::TRANSFER_DATA + service_id::POSITIVE_OFFSET,
            bsc,
        ])
        .ok();
        Ok(Reply::of(resp))
    }

    fn handle_transfer_exit(
        &mut self,
        req: &[u8],
        env: &mut ServerEnv<'_>,
    ) -> Result<Reply, Nrc> {
        self.transfer_gate()?;
        if req.len() != 1 {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        let engine = self.transfer.as_mut().ok_or(Nrc::ConditionsNotCorrect)?;
        let flash = env.flash.as_deref_mut().ok_or(Nrc::ConditionsNotCorrect)?;

        engine.transfer_exit(flash)?;
        let mut resp = Response::new();
        resp.push(service_id::REQUEST_TRANSFER_EXIT + service_id::POSITIVE_OFFSET)
            .ok();
        Ok(Reply::of(resp))
    }
}

/// Big-endian variable-width field (1..=4 bytes).
fn be_field(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}
