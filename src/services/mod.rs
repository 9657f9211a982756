//! Board services used by the session and the command line.
//!
//! ARCHITECTURE
//! ============
//! `engine` owns the local element list and reconciles it with the change
//! feed. The remaining modules are thin command layers: permission and
//! validation checks first, then a store write or an engine patch.

pub mod actions;
pub mod board;
pub mod drawing;
pub mod engine;
pub mod permission;
pub mod poll;
pub mod session;
