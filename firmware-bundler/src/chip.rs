// Licensed under the Apache-2.0 license

//! The chips the merge tool knows how to lay out an image for.

use std::{fmt, str::FromStr};

use clap::ValueEnum;

use crate::error::MergeError;

/// The magic byte every ESP application and bootloader image starts with.
pub const ESP_IMAGE_MAGIC: u8 = 0xE9;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chip {
    Esp8266,
    Esp32,
    Esp32s2,
    Esp32s3,
    Esp32c2,
    Esp32c3,
    Esp32c6,
    Esp32h2,
}

impl Chip {
    /// The flash offset the ROM loads the second stage bootloader from.
    pub fn bootloader_offset(&self) -> u64 {
        match self {
            Chip::Esp32 | Chip::Esp32s2 => 0x1000,
            Chip::Esp8266
            | Chip::Esp32s3
            | Chip::Esp32c2
            | Chip::Esp32c3
            | Chip::Esp32c6
            | Chip::Esp32h2 => 0x0,
        }
    }
}

impl FromStr for Chip {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Chip as ValueEnum>::from_str(s.trim(), true)
            .map_err(|_| MergeError::UnknownChip(s.to_string()))
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_possible_value() {
            Some(value) => f.write_str(value.get_name()),
            None => write!(f, "{self:?}"),
        }
    }
}
