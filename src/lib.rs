//! Quantum-Secured Channel (qsc)
//!
//! This crate provides:
//! - A simulated BB84 key agreement: sifting, QBER estimation, Cascade
//!   reconciliation and Toeplitz privacy amplification
//! - A symmetric channel keyed from the agreed secret (AES-GCM, with a
//!   legacy AES-CBC path)
//! - RSA-OAEP key management with PEM import/export and key transport
//! - RSA-PSS signing behind a pluggable signer trait
//!
//! The CLI wrapper lives in `src/main.rs`.

#![deny(unsafe_code)]

pub mod error;
pub mod config;

pub mod amplify;
pub mod asymmetric;
pub mod bits;
pub mod cascade;
pub mod channel;
pub mod qber;
pub mod rng;
pub mod session;
pub mod signing;
pub mod util;
