// Licensed under the Apache-2.0 license

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while merging binaries into a single flash image.
#[derive(Error, Debug)]
pub enum MergeError {
    /// An input binary could not be read, or the output image could not be written.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown chip '{0}'")]
    UnknownChip(String),

    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    #[error("Invalid flash size '{0}'")]
    InvalidFlashSize(String),

    /// A section starts inside data that was already placed by a lower-addressed section.
    #[error("Detected overlap at address {address:#x} for file {}", file.display())]
    Overlap { address: u64, file: PathBuf },

    #[error("Address {address:#x} of {} is below the target offset {target_offset:#x}", file.display())]
    BelowTargetOffset {
        address: u64,
        file: PathBuf,
        target_offset: u64,
    },

    #[error("Merged image ({image_size:#x} bytes) exceeds the flash size ({flash_size:#x} bytes)")]
    ExceedsFlashSize { image_size: u64, flash_size: u64 },
}

/// Result type for merge operations
pub type MergeResult<T> = std::result::Result<T, MergeError>;
