// Copyright 2026 Vellum Dev
// SPDX-License-Identifier: Apache-2.0

//! Logical timestamps for ordering oplog entries.
//!
//! A timestamp pairs a coarse clock component (seconds) with an
//! increment that disambiguates operations within the same second.
//!
//! # Format
//!
//! The timestamp is packed into a 64-bit value:
//! - Bits 32-63 (32 bits): seconds component
//! - Bits 0-31 (32 bits): increment component
//!
//! This layout allows raw u64 comparison to correctly order timestamps
//! (seconds first, then increment), which is exactly the unsigned
//! lexicographic order the oplog is keyed by.
//!
//! # Example
//!
//! ```
//! use vellum_core::Timestamp;
//!
//! let ts1 = Timestamp::from_parts(10, 4);
//! let ts2 = Timestamp::from_parts(10, 5);
//! let ts3 = Timestamp::from_parts(11, 1);
//! assert!(ts1 < ts2);
//! assert!(ts2 < ts3);
//! assert_eq!(ts1.to_string(), "(10, 4)");
//! ```

use serde::{Deserialize, Serialize};

/// Number of bits for the increment component.
const INCREMENT_BITS: u32 = 32;

/// Mask for the increment component (lower 32 bits).
const INCREMENT_MASK: u64 = 0x0000_0000_FFFF_FFFF;

/// A logical timestamp keying the oplog.
///
/// The null timestamp (all zeroes) means "unset"; persisted markers use
/// it to represent the absence of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from its seconds and increment components.
    #[must_use]
    pub const fn from_parts(secs: u32, increment: u32) -> Self {
        Self(((secs as u64) << INCREMENT_BITS) | (increment as u64))
    }

    /// Creates a timestamp from a raw packed u64 value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw packed u64 value.
    #[must_use]
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns the seconds component.
    #[must_use]
    pub const fn secs(&self) -> u32 {
        (self.0 >> INCREMENT_BITS) as u32
    }

    /// Returns the increment component.
    #[must_use]
    pub const fn increment(&self) -> u32 {
        (self.0 & INCREMENT_MASK) as u32
    }

    /// The null (unset) timestamp.
    #[must_use]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Returns true if this is the null timestamp.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::null()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.secs(), self.increment())
    }
}

impl From<u64> for Timestamp {
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.as_raw()
    }
}
