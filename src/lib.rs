//! CanDiag: UDS (ISO 14229-1) diagnostic and reprogramming server
//! engine for CAN-based ECUs.
//!
//! The engine is pure logic behind port traits: the ISO-TP link, flash
//! controller, clock and seed/key algorithm are collaborators supplied by
//! the deployment, so the whole protocol stack runs on the host against
//! mocks. Two images share it: the application (read/write diagnostics,
//! hand-off into the bootloader) and the bootloader (flash
//! reprogramming, jump to application).

#![deny(unused_must_use)]

pub mod boot;
pub mod config;
pub mod flash;
pub mod nvm;
pub mod ports;
pub mod profiles;
pub mod seedkey;
pub mod server;
pub mod time;

mod error;

pub use error::{FlashError, Nrc, TransportError};
