//! Process exit codes, one per failure class a caller may want to triage.
//!
//! `2` is left to clap, which exits with it on a usage error.

pub const EXIT_SUCCESS: i32 = 0;
/// Bad input, missing files, I/O and anything not listed below.
pub const EXIT_GENERIC_FAIL: i32 = 1;
/// A checkpoint tensor has no canonical name.
pub const EXIT_STRICT_MAPPING: i32 = 3;
pub const EXIT_VOCAB: i32 = 4;
pub const EXIT_UNSUPPORTED_ARCH: i32 = 5;
