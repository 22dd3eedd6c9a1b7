//! Routine engine.
//!
//! Runs integrator-supplied routine bodies as a polled, timeout-bounded
//! state machine:
//!
//! ```text
//! Idle ──start──▶ Start ──body──▶ Running ──body──▶ Done ──results──▶ Idle
//!                   │                │
//!                   └── timeout ─────┴──▶ Timeout ──results(fail)──▶ Idle
//! ```
//!
//! The body is invoked once per poll cycle while the record is in
//! `Start`/`Running`; before each invocation the elapsed time is checked
//! against the routine's timeout, and on expiry the record is forced to
//! `Timeout` without invoking the body again. Exactly one routine may be
//! running process-wide.

use heapless::Vec;
use log::{info, warn};

use crate::config::{RoutineEntry, MAX_ROUTINES, MAX_ROUTINE_IO};
use crate::error::Nrc;
use crate::ports::RoutineHandler;
use crate::time::Clock;

// ── Routine state ────────────────────────────────────────────

/// Lifecycle of one routine record. Bodies only ever move
/// `Start -> Running -> Done`; `Idle` and `Timeout` are engine-owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineState {
    Idle,
    Start,
    Running,
    Done,
    Timeout,
}

/// Context handed to a routine body on each poll.
pub struct RoutinePoll<'a> {
    pub rid: u16,
    pub state: &'a mut RoutineState,
    pub argument: &'a [u8],
    pub result: &'a mut [u8],
}

/// One configured routine plus its run-time state.
struct RoutineRecord {
    entry: RoutineEntry,
    state: RoutineState,
    start_time: u64,
    argument: Vec<u8, MAX_ROUTINE_IO>,
    result: Vec<u8, MAX_ROUTINE_IO>,
}

// ── Engine ───────────────────────────────────────────────────

pub struct RoutineEngine {
    records: Vec<RoutineRecord, MAX_ROUTINES>,
    /// Index of the record currently in `Start`/`Running`.
    running: Option<usize>,
}

impl RoutineEngine {
    pub fn new(entries: &[RoutineEntry]) -> Self {
        let mut records = Vec::new();
        for e in entries {
            assert!(e.arg_len <= MAX_ROUTINE_IO && e.result_len <= MAX_ROUTINE_IO);
            let mut result = Vec::new();
            result.resize(e.result_len, 0).ok();
            records
                .push(RoutineRecord {
                    entry: *e,
                    state: RoutineState::Idle,
                    start_time: 0,
                    argument: Vec::new(),
                    result,
                })
                .ok();
        }
        Self {
            records,
            running: None,
        }
    }

    pub fn find(&self, rid: u16) -> Option<usize> {
        self.records.iter().position(|r| r.entry.rid == rid)
    }

    pub fn entry(&self, index: usize) -> &RoutineEntry {
        &self.records[index].entry
    }

    pub fn state(&self, index: usize) -> RoutineState {
        self.records[index].state
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Handle a Start request for the routine at `index`.
    pub fn start(&mut self, index: usize, args: &[u8], now: u64) -> Result<(), Nrc> {
        if self.running.is_some() {
            return Err(Nrc::ConditionsNotCorrect);
        }
        let record = &mut self.records[index];
        if record.state != RoutineState::Idle {
            return Err(Nrc::ConditionsNotCorrect);
        }
        if args.len() > record.entry.arg_len {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }

        record.argument.clear();
        record.argument.extend_from_slice(args).ok();
        record.result.clear();
        record.result.resize(record.entry.result_len, 0).ok();
        record.state = RoutineState::Start;
        record.start_time = now;
        self.running = Some(index);
        info!("uds: routine {:#06x} started", record.entry.rid);
        Ok(())
    }

    /// Handle a Request-Results request. `Done` yields the result record
    /// and frees the routine for a re-start; `Timeout` surfaces the
    /// failure and also resets.
    pub fn request_results(&mut self, index: usize) -> Result<Vec<u8, MAX_ROUTINE_IO>, Nrc> {
        let record = &mut self.records[index];
        match record.state {
            RoutineState::Done => {
                let out = record.result.clone();
                record.state = RoutineState::Idle;
                Ok(out)
            }
            RoutineState::Timeout => {
                record.state = RoutineState::Idle;
                Err(Nrc::ConditionsNotCorrect)
            }
            _ => Err(Nrc::ConditionsNotCorrect),
        }
    }

    /// One poll cycle: timeout check, then one body invocation for the
    /// running routine.
    pub fn poll(&mut self, clock: &dyn Clock, handler: &mut dyn RoutineHandler) {
        let Some(index) = self.running else {
            return;
        };
        let record = &mut self.records[index];

        if clock.elapsed_ms(record.start_time) > record.entry.timeout_ms {
            warn!("uds: routine {:#06x} timed out", record.entry.rid);
            record.state = RoutineState::Timeout;
            self.running = None;
            return;
        }

        let mut ctx = RoutinePoll {
            rid: record.entry.rid,
            state: &mut record.state,
            argument: record.argument.as_slice(),
            result: record.result.as_mut_slice(),
        };
        handler.run(&mut ctx);

        if record.state == RoutineState::Done {
            info!("uds: routine {:#06x} done", record.entry.rid);
            self.running = None;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
