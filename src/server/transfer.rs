//! Flash transfer engine (bootloader deployment).
//!
//! Backs the RequestDownload → TransferData × N → RequestTransferExit
//! triad. A download session converts the chunked byte stream into
//! page-erase + double-word-program + verify operations:
//!
//! - each page is erased lazily the first time a programmed word touches
//!   it, and at most once per download session;
//! - an all-`0xFF` double word is skipped (flash already reads erased
//!   there, and a redundant program cycle is forbidden on some parts);
//! - every programmed word is read back; a mismatch aborts the whole
//!   transfer with a programming failure, flash re-locked, and the server
//!   ready for a fresh RequestDownload.
//!
//! Flash is write-enabled only for the duration of one block, so an
//! engine reset mid-transfer never leaves the controller unlocked.

use log::{info, warn};

use crate::config::TransferConfig;
use crate::error::Nrc;
use crate::flash::{FlashPort, PROGRAM_WORD_BYTES};

/// Upper bound on application-region pages tracked by the erase map.
pub const MAX_APP_PAGES: usize = 128;

/// Block sequence counter successor: 1-based, wraps 255 -> 1.
pub const fn next_bsc(bsc: u8) -> u8 {
    if bsc == 0xFF { 1 } else { bsc + 1 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    Idle,
    Downloading {
        next_addr: u32,
        end_addr: u32,
        bsc: u8,
    },
}

pub struct TransferEngine {
    cfg: TransferConfig,
    state: TransferState,
    page_erased: [bool; MAX_APP_PAGES],
}

impl TransferEngine {
    pub fn new(cfg: TransferConfig) -> Self {
        cfg.layout.validate();
        assert!(
            cfg.layout.app_page_count() as usize <= MAX_APP_PAGES,
            "application region exceeds erase map capacity"
        );
        assert!(cfg.max_block_len > 2, "max block length too small");
        Self {
            cfg,
            state: TransferState::Idle,
            page_erased: [false; MAX_APP_PAGES],
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TransferState::Downloading { .. })
    }

    /// Expected block sequence counter of the next TransferData, if a
    /// download is active.
    pub fn expected_bsc(&self) -> Option<u8> {
        match self.state {
            TransferState::Downloading { bsc, .. } => Some(bsc),
            TransferState::Idle => None,
        }
    }

    /// Largest TransferData payload accepted per block.
    fn max_payload(&self) -> usize {
        usize::from(self.cfg.max_block_len) - 2
    }

    /// Begin a download into `[addr, addr + size)`. Returns the
    /// maxNumberOfBlockLength to report.
    pub fn request_download(&mut self, addr: u32, size: u32) -> Result<u16, Nrc> {
        if size == 0 || addr % PROGRAM_WORD_BYTES != 0 {
            return Err(Nrc::UploadDownloadNotAccepted);
        }
        if !self.cfg.layout.app_window_contains(addr, size) {
            return Err(Nrc::RequestOutOfRange);
        }

        self.page_erased = [false; MAX_APP_PAGES];
        self.state = TransferState::Downloading {
            next_addr: addr,
            end_addr: addr + size,
            bsc: 1,
        };
        info!("uds: download {:#010x} +{} bytes", addr, size);
        Ok(self.cfg.max_block_len)
    }

    /// Program one TransferData block. Returns the echoed block sequence
    /// counter on success.
    pub fn transfer_data(
        &mut self,
        bsc: u8,
        payload: &[u8],
        flash: &mut dyn FlashPort,
    ) -> Result<u8, Nrc> {
        let TransferState::Downloading {
            next_addr,
            end_addr,
            bsc: expected,
        } = self.state
        else {
            return Err(Nrc::RequestSequenceError);
        };

        if bsc != expected {
            warn!("uds: block counter {} (expected {})", bsc, expected);
            return Err(Nrc::WrongBlockSequenceCounter);
        }
        if payload.is_empty() || payload.len() > self.max_payload() {
            return Err(Nrc::IncorrectMessageLengthOrFormat);
        }
        if next_addr + payload.len() as u32 > end_addr {
            return Err(Nrc::RequestOutOfRange);
        }

        if let Err(e) = self.program_block(next_addr, payload, flash) {
            warn!("uds: transfer aborted at {:#010x}: {}", next_addr, e);
            flash.lock();
            self.state = TransferState::Idle;
            return Err(Nrc::GeneralProgrammingFailure);
        }
        flash.lock();

        self.state = TransferState::Downloading {
            next_addr: next_addr + payload.len() as u32,
            end_addr,
            bsc: next_bsc(expected),
        };
        Ok(bsc)
    }

    /// End the download and release the flash write enable.
    pub fn transfer_exit(&mut self, flash: &mut dyn FlashPort) -> Result<(), Nrc> {
        if !self.is_active() {
            return Err(Nrc::RequestSequenceError);
        }
        flash.lock();
        self.state = TransferState::Idle;
        info!("uds: transfer exit");
        Ok(())
    }

    fn program_block(
        &mut self,
        start: u32,
        payload: &[u8],
        flash: &mut dyn FlashPort,
    ) -> Result<(), crate::error::FlashError> {
        use crate::error::FlashError;

        flash.unlock()?;

        let word = PROGRAM_WORD_BYTES as usize;
        for (i, chunk) in payload.chunks(word).enumerate() {
            let addr = start + (i * word) as u32;

            // Window validation already pinned us inside the app region.
            let page = self
                .cfg
                .layout
                .app_page_of(addr)
                .expect("programmed address left the application region")
                as usize;
            if !self.page_erased[page] {
                flash.erase_page(self.cfg.layout.page_of(addr))?;
                self.page_erased[page] = true;
                info!("uds: page {} erased", self.cfg.layout.page_of(addr));
            }

            // Little-endian accumulation; a short tail is zero-padded.
            let mut value = 0u64;
            for (j, b) in chunk.iter().enumerate() {
                value |= u64::from(*b) << (j * 8);
            }
            if value == u64::MAX {
                continue; // already reads erased there
            }

            flash.program_dword(addr, value)?;
            if flash.read_dword(addr) != value {
                return Err(FlashError::VerifyFailed);
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────
