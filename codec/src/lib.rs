//! This crate implements LoRaWAN 1.0.x packet handling and parsing for an
//! end device.
//!
//! Cryptography is reached through the [`keys::SecurityModule`] trait, which
//! names keys by descriptor so the key material itself can live in a secure
//! element. A software implementation backed by the `aes` and `cmac` crates
//! is provided in [`default_sm`].
#![no_std]
#![allow(clippy::upper_case_acronyms)]
pub mod creator;
pub mod default_sm;
pub mod keys;
pub mod maccommandcreator;
pub mod maccommands;
pub mod parser;

mod securityhelpers;
