// Licensed under the Apache-2.0 license

//! Merging of independently built firmware binaries into a single flashable image.
//!
//! A firmware build for an ESP chip produces several binaries: the second stage bootloader, the
//! partition table, the application, and optionally data partitions such as a filesystem image.
//! Each of these has to be written to its own flash offset.  The merge places every binary at its
//! offset within one image, filling the gaps with erased flash, so the result can be written to
//! the device in a single operation starting at the target offset.
//!
//! The merge is a plain library call taking a typed [`MergeRequest`]; the `xtask merge-bin`
//! command exposes the same functionality through [`args::MergeArgs`].

pub mod args;
pub mod chip;
pub mod error;
pub mod merge;

pub use chip::Chip;
pub use error::{MergeError, MergeResult};
pub use merge::{merge_bin, parse_address, FlashSection, FlashSize, MergeRequest, MergeSummary};

/// Run a merge described by command line arguments.
pub fn execute(args: &args::MergeArgs) -> MergeResult<MergeSummary> {
    merge_bin(&args.to_request()?)
}
