//! Non-volatile mirror (application deployment).
//!
//! Keeps a RAM copy of a small persisted calibration block living in the
//! NVM region at the top of flash. The persisted image is the
//! `postcard`-encoded block at the start of the region plus a canary word
//! in the region's last four bytes:
//!
//! ```text
//! nvm_start                                        nvm_end
//! ┌───────────────────┬──────── 0xFF ───────────┬─────────┐
//! │ postcard(T)       │ erased padding          │ canary  │
//! └───────────────────┴─────────────────────────┴─────────┘
//! ```
//!
//! A bad canary or undecodable block means first boot or corruption: the
//! mirror resets to defaults and rewrites the region. [`sync`] is called
//! once per main-loop cycle and commits only when the encoding differs
//! from what is persisted; whole-region erase-and-rewrite, acceptable
//! because the block is small and writes are operator-driven.
//!
//! [`sync`]: NvmMirror::sync

use heapless::Vec;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::FlashError;
use crate::flash::{FlashLayout, FlashPort, PROGRAM_WORD_BYTES};

/// Guard word in the last four bytes of the NVM region.
pub const NVM_CANARY: u32 = 0xC0DE_CAFE;

/// Largest encoded calibration block.
pub const MAX_NVM_BLOCK: usize = 256;

/// Largest supported NVM region.
const MAX_NVM_REGION: usize = 2048;

pub struct NvmMirror<T> {
    layout: FlashLayout,
    value: T,
    /// Encoding currently persisted in flash.
    persisted: Vec<u8, MAX_NVM_BLOCK>,
}

impl<T> NvmMirror<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Load the persisted block, recovering to defaults on a canary or
    /// decode failure.
    pub fn load(layout: FlashLayout, flash: &mut dyn FlashPort) -> Result<Self, FlashError> {
        layout.validate();
        assert!(layout.nvm_len as usize <= MAX_NVM_REGION);
        assert!((layout.nvm_len as usize) >= MAX_NVM_BLOCK + 4);

        let mut canary_bytes = [0u8; 4];
        flash.read(layout.nvm_end() - 4, &mut canary_bytes);

        let mut block = [0u8; MAX_NVM_BLOCK];
        flash.read(layout.nvm_start(), &mut block);

        if u32::from_le_bytes(canary_bytes) == NVM_CANARY {
            if let Ok((value, rest)) = postcard::take_from_bytes::<T>(&block) {
                let used = MAX_NVM_BLOCK - rest.len();
                let mut persisted = Vec::new();
                persisted.extend_from_slice(&block[..used]).ok();
                return Ok(Self {
                    layout,
                    value,
                    persisted,
                });
            }
            warn!("nvm: canary valid but block undecodable, resetting");
        } else {
            info!("nvm: canary mismatch, initialising region");
        }

        let mut mirror = Self {
            layout,
            value: T::default(),
            persisted: Vec::new(),
        };
        mirror.commit(flash)?;
        Ok(mirror)
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Mutable access; changes reach flash on the next [`sync`](Self::sync).
    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Commit the mirror if it differs from the persisted image.
    /// Returns `true` when a write actually happened.
    pub fn sync(&mut self, flash: &mut dyn FlashPort) -> Result<bool, FlashError> {
        let mut buf = [0u8; MAX_NVM_BLOCK];
        let encoded =
            postcard::to_slice(&self.value, &mut buf).map_err(|_| FlashError::OutOfBounds)?;
        if encoded[..] == self.persisted[..] {
            return Ok(false);
        }
        self.commit(flash)?;
        Ok(true)
    }

    fn commit(&mut self, flash: &mut dyn FlashPort) -> Result<(), FlashError> {
        let mut region = [0xFFu8; MAX_NVM_REGION];
        let nvm_len = self.layout.nvm_len as usize;

        let mut buf = [0u8; MAX_NVM_BLOCK];
        let encoded =
            postcard::to_slice(&self.value, &mut buf).map_err(|_| FlashError::OutOfBounds)?;
        region[..encoded.len()].copy_from_slice(encoded);
        region[nvm_len - 4..nvm_len].copy_from_slice(&NVM_CANARY.to_le_bytes());

        flash.unlock()?;
        let first_page = self.layout.page_of(self.layout.nvm_start());
        for page in 0..self.layout.nvm_len / self.layout.page_size {
            if let Err(e) = flash.erase_page(first_page + page) {
                flash.lock();
                return Err(e);
            }
        }

        let word = PROGRAM_WORD_BYTES as usize;
        for (i, chunk) in region[..nvm_len].chunks(word).enumerate() {
            let mut value = 0u64;
            for (j, b) in chunk.iter().enumerate() {
                value |= u64::from(*b) << (j * 8);
            }
            if value == u64::MAX {
                continue; // erased already reads back 0xFF
            }
            let addr = self.layout.nvm_start() + (i * word) as u32;
            if let Err(e) = flash.program_dword(addr, value) {
                flash.lock();
                return Err(e);
            }
        }
        flash.lock();

        self.persisted.clear();
        self.persisted.extend_from_slice(encoded).ok();
        info!("nvm: region rewritten ({} bytes)", encoded.len());
        Ok(())
    }
}
