//! Data types shared across the stack.
//!
//! This module contains:
//! - Bluetooth device addresses
//! - Status codes reported to the application
//! - PBAP feature and repository bitmaps

pub mod address;
pub mod features;
pub mod status;

pub use address::BdAddr;
pub use features::{PbapFeatures, Repositories};
pub use status::PbaStatus;
