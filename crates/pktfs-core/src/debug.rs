// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Runtime debug categories.
//!
//! The mask is read from an environment variable (default `PKTFS_DEBUG`) on
//! every timer tick, so categories can be switched on a live mount. Enabled
//! categories emit `tracing` debug events under `pktfs::<category>`.

use std::sync::atomic::{AtomicU32, Ordering};

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    General = 1,
    Protocol = 2,
    Notify = 4,
    Resolve = 8,
    Directory = 16,
    Charset = 32,
    Operations = 64,
}

pub const ALL_CATEGORIES: u32 = 0x7f;

#[derive(Debug, Default)]
pub struct DebugMask(AtomicU32);

impl DebugMask {
    pub fn new(bits: u32) -> Self {
        Self(AtomicU32::new(bits & ALL_CATEGORIES))
    }

    pub fn bits(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, bits: u32) {
        self.0.store(bits & ALL_CATEGORIES, Ordering::Relaxed);
    }

    pub fn enabled(&self, category: Category) -> bool {
        self.bits() & category as u32 != 0
    }

    /// Re-read the mask from `var`. An unset or unparsable variable clears it.
    /// Returns true when the mask changed.
    pub fn reload(&self, var: &str) -> bool {
        let bits = std::env::var(var).ok().and_then(|v| parse_mask(&v)).unwrap_or(0);
        let old = self.0.swap(bits & ALL_CATEGORIES, Ordering::Relaxed);
        old != bits & ALL_CATEGORIES
    }
}

/// Parse a decimal or `0x` hexadecimal mask
pub fn parse_mask(value: &str) -> Option<u32> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

/// Emit a debug event when `category` is enabled in `mask`
#[macro_export]
macro_rules! fs_debug {
    ($mask:expr, general, $($arg:tt)+) => {
        if $mask.enabled($crate::debug::Category::General) {
            ::tracing::debug!(target: "pktfs::general", $($arg)+);
        }
    };
    ($mask:expr, protocol, $($arg:tt)+) => {
        if $mask.enabled($crate::debug::Category::Protocol) {
            ::tracing::debug!(target: "pktfs::protocol", $($arg)+);
        }
    };
    ($mask:expr, notify, $($arg:tt)+) => {
        if $mask.enabled($crate::debug::Category::Notify) {
            ::tracing::debug!(target: "pktfs::notify", $($arg)+);
        }
    };
    ($mask:expr, resolve, $($arg:tt)+) => {
        if $mask.enabled($crate::debug::Category::Resolve) {
            ::tracing::debug!(target: "pktfs::resolve", $($arg)+);
        }
    };
    ($mask:expr, directory, $($arg:tt)+) => {
        if $mask.enabled($crate::debug::Category::Directory) {
            ::tracing::debug!(target: "pktfs::directory", $($arg)+);
        }
    };
    ($mask:expr, charset, $($arg:tt)+) => {
        if $mask.enabled($crate::debug::Category::Charset) {
            ::tracing::debug!(target: "pktfs::charset", $($arg)+);
        }
    };
    ($mask:expr, operations, $($arg:tt)+) => {
        if $mask.enabled($crate::debug::Category::Operations) {
            ::tracing::debug!(target: "pktfs::operations", $($arg)+);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mask() {
        assert_eq!(parse_mask("6"), Some(6));
        assert_eq!(parse_mask(" 0x41 "), Some(0x41));
        assert_eq!(parse_mask("notify"), None);
    }

    #[test]
    fn test_reload_from_env() {
        let var = "PKTFS_DEBUG_TEST_RELOAD";
        let mask = DebugMask::default();
        std::env::set_var(var, "0x0c");
        assert!(mask.reload(var));
        assert!(mask.enabled(Category::Notify));
        assert!(mask.enabled(Category::Resolve));
        assert!(!mask.enabled(Category::Protocol));
        assert!(!mask.reload(var));
        std::env::remove_var(var);
        assert!(mask.reload(var));
        assert_eq!(mask.bits(), 0);
    }

    #[test]
    fn test_unknown_bits_are_dropped() {
        let mask = DebugMask::new(0xff00 | Category::General as u32);
        assert_eq!(mask.bits(), 1);
    }
}
