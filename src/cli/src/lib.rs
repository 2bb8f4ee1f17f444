//! Enclayer CLI library.
//!
//! Pushes and pulls container images whose layers and config are
//! encrypted client-side, so the registry only ever stores ciphertext.

pub mod commands;
