//! Cryptographic and protocol core of an NTAG424 DNA SDM (Bolt Card)
//! read-only tag emulator: primitives (`bytes`, `aes128`, `cmac`, `kdf`),
//! the SDM message builder (`sdm`), the APDU codec (`apdu`), the tag state
//! machine (`tag`), and the two narrow adapter boundaries it depends on
//! (`persistence`, `transport`).

pub mod aes128;
pub mod apdu;
pub mod bytes;
pub mod cmac;
pub mod config;
pub mod kdf;
pub mod models;
pub mod persistence;
pub mod sdm;
pub mod tag;
pub mod transport;
