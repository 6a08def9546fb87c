//! Re-export of the memguard crate functionality
//!
//! This module provides direct access to the memguard crate's functionality
//! for advanced secure memory management. All types and functions are re-exported
//! from the standalone memguard crate.

// Re-export everything from the memguard crate
pub use memguard::*;