// Licensed under the Apache-2.0 license

//! A module to combine a set of binaries into a single image which can be written to flash at
//! offset 0 (or at the configured target offset).

use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, info, warn};

use crate::{
    chip::{Chip, ESP_IMAGE_MAGIC},
    error::{MergeError, MergeResult},
};

/// The value of erased flash.  Gaps between sections are filled with it so the merged image
/// writes the same bytes an erase cycle would have left behind.
pub const FILL_BYTE: u8 = 0xFF;

/// A binary to be placed at `address` within the merged image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSection {
    pub address: u64,
    pub file: PathBuf,
}

impl FlashSection {
    pub fn new(address: u64, file: impl Into<PathBuf>) -> Self {
        Self {
            address,
            file: file.into(),
        }
    }
}

/// The size of a flash chip.  Parsed from strings of the form `4MB` or `256KB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashSize(u64);

impl FlashSize {
    const SUPPORTED: &'static [&'static str] = &[
        "256KB", "512KB", "1MB", "2MB", "4MB", "8MB", "16MB", "32MB", "64MB", "128MB",
    ];

    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for FlashSize {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        if !Self::SUPPORTED.contains(&normalized.as_str()) {
            return Err(MergeError::InvalidFlashSize(s.to_string()));
        }

        let (digits, unit) = match normalized.strip_suffix("MB") {
            Some(d) => (d, 1024 * 1024),
            None => (normalized.trim_end_matches("KB"), 1024),
        };
        digits
            .parse::<u64>()
            .map(|n| FlashSize(n * unit))
            .map_err(|_| MergeError::InvalidFlashSize(s.to_string()))
    }
}

/// Parse an address given either as `0x` prefixed hex or as plain decimal.
pub fn parse_address(s: &str) -> MergeResult<u64> {
    clap_num::maybe_hex::<u64>(s.trim()).map_err(|_| MergeError::InvalidAddress(s.to_string()))
}

/// Everything the merge needs to produce an image.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub chip: Chip,
    pub output: PathBuf,
    pub sections: Vec<FlashSection>,

    /// The flash address the merged image will be written to.  Every section address must be at
    /// or above it.
    pub target_offset: u64,

    /// Pad the merged image with erased flash up to this size.
    pub fill_flash_size: Option<FlashSize>,
}

impl MergeRequest {
    pub fn new(chip: Chip, output: impl Into<PathBuf>, sections: Vec<FlashSection>) -> Self {
        Self {
            chip,
            output: output.into(),
            sections,
            target_offset: 0,
            fill_flash_size: None,
        }
    }
}

/// A summary of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub output: PathBuf,
    pub image_size: u64,
    pub sections: usize,
}

/// Take a collection of binaries and write a single image containing each of them at its
/// address.
///
/// This could fail if two binaries overlap, if an address falls below the target offset, if the
/// image does not fit the requested flash size, or if a hard drive operation fails.
pub fn merge_bin(request: &MergeRequest) -> MergeResult<MergeSummary> {
    let image = build_image(request)?;

    std::fs::write(&request.output, &image).map_err(|source| MergeError::Io {
        path: request.output.clone(),
        source,
    })?;

    Ok(MergeSummary {
        output: request.output.clone(),
        image_size: image.len() as u64,
        sections: request.sections.len(),
    })
}

/// Assemble the merged image in memory.  Flash images are at most a few tens of Megabytes, so
/// this is cheaper than seeking around in the output file.
fn build_image(request: &MergeRequest) -> MergeResult<Vec<u8>> {
    let mut sections = request.sections.clone();
    sections.sort_by_key(|s| s.address);
    info!(
        "Merging {} sections for {} at target offset {:#x}",
        sections.len(),
        request.chip,
        request.target_offset
    );

    let mut image = Vec::new();
    for section in &sections {
        if section.address < request.target_offset {
            return Err(MergeError::BelowTargetOffset {
                address: section.address,
                file: section.file.clone(),
                target_offset: request.target_offset,
            });
        }

        let start = to_usize(section.address - request.target_offset, &section.file)?;
        match image.len().cmp(&start) {
            Ordering::Less => image.resize(start, FILL_BYTE),
            Ordering::Greater => {
                return Err(MergeError::Overlap {
                    address: section.address,
                    file: section.file.clone(),
                })
            }
            Ordering::Equal => { /* no op */ }
        }

        let data = std::fs::read(&section.file).map_err(|source| MergeError::Io {
            path: section.file.clone(),
            source,
        })?;

        if section.address == request.chip.bootloader_offset()
            && data.first() != Some(&ESP_IMAGE_MAGIC)
        {
            warn!(
                "{} at bootloader offset {:#x} does not start with image magic {:#x}",
                section.file.display(),
                section.address,
                ESP_IMAGE_MAGIC
            );
        }

        debug!(
            "Placing {} ({:#x} bytes) at {:#x}",
            section.file.display(),
            data.len(),
            section.address
        );
        image.extend_from_slice(&data);
    }

    if let Some(flash_size) = request.fill_flash_size {
        let image_size = image.len() as u64;
        if image_size > flash_size.bytes() {
            return Err(MergeError::ExceedsFlashSize {
                image_size,
                flash_size: flash_size.bytes(),
            });
        }
        image.resize(to_usize(flash_size.bytes(), &request.output)?, FILL_BYTE);
    }

    Ok(image)
}

fn to_usize(value: u64, file: &Path) -> MergeResult<usize> {
    usize::try_from(value)
        .map_err(|_| MergeError::InvalidAddress(format!("{value:#x} ({})", file.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Write `contents` to a file named `name` in the temp directory and return a section for it.
    fn test_section(temp: &TempDir, name: &str, address: u64, contents: &[u8]) -> FlashSection {
        let path = temp.path().join(name);
        std::fs::write(&path, contents).unwrap();
        FlashSection::new(address, path)
    }

    fn test_request(temp: &TempDir, sections: Vec<FlashSection>) -> MergeRequest {
        MergeRequest::new(Chip::Esp32c3, temp.path().join("merged.bin"), sections)
    }

    #[test]
    fn sections_are_padded_with_erased_flash() {
        let temp = TempDir::new().unwrap();
        let request = test_request(
            &temp,
            vec![
                test_section(&temp, "boot.bin", 0x0, &[ESP_IMAGE_MAGIC, 0x01]),
                test_section(&temp, "app.bin", 0x8, &[0xAA, 0xBB]),
            ],
        );

        let summary = merge_bin(&request).unwrap();
        assert_eq!(summary.image_size, 10);
        assert_eq!(summary.sections, 2);

        let image = std::fs::read(&request.output).unwrap();
        assert_eq!(
            image,
            vec![ESP_IMAGE_MAGIC, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xAA, 0xBB]
        );
    }

    #[test]
    fn sections_are_placed_in_address_order() {
        let temp = TempDir::new().unwrap();
        let request = test_request(
            &temp,
            vec![
                test_section(&temp, "high.bin", 0x4, &[0x22]),
                test_section(&temp, "low.bin", 0x0, &[0x11]),
            ],
        );

        merge_bin(&request).unwrap();
        let image = std::fs::read(&request.output).unwrap();
        assert_eq!(image, vec![0x11, 0xFF, 0xFF, 0xFF, 0x22]);
    }

    #[test]
    fn overlapping_sections_fail() {
        let temp = TempDir::new().unwrap();
        let request = test_request(
            &temp,
            vec![
                test_section(&temp, "a.bin", 0x0, &[0x00; 0x10]),
                test_section(&temp, "b.bin", 0x8, &[0x01]),
            ],
        );

        let result = merge_bin(&request);
        assert!(matches!(result, Err(MergeError::Overlap { address: 0x8, .. })));
        assert!(!request.output.exists());
    }

    #[test]
    fn target_offset_shifts_image() {
        let temp = TempDir::new().unwrap();
        let mut request = test_request(&temp, vec![test_section(&temp, "app.bin", 0x10002, &[0x5A])]);
        request.target_offset = 0x10000;

        merge_bin(&request).unwrap();
        let image = std::fs::read(&request.output).unwrap();
        assert_eq!(image, vec![0xFF, 0xFF, 0x5A]);
    }

    #[test]
    fn address_below_target_offset_fails() {
        let temp = TempDir::new().unwrap();
        let mut request = test_request(&temp, vec![test_section(&temp, "a.bin", 0x0, &[0x01])]);
        request.target_offset = 0x1000;

        let result = merge_bin(&request);
        assert!(matches!(result, Err(MergeError::BelowTargetOffset { .. })));
    }

    #[test]
    fn fill_flash_size_pads_to_full_chip() {
        let temp = TempDir::new().unwrap();
        let mut request = test_request(&temp, vec![test_section(&temp, "a.bin", 0x0, &[0x01])]);
        request.fill_flash_size = Some("256KB".parse().unwrap());

        let summary = merge_bin(&request).unwrap();
        assert_eq!(summary.image_size, 256 * 1024);
        let image = std::fs::read(&request.output).unwrap();
        assert_eq!(image[0], 0x01);
        assert!(image[1..].iter().all(|b| *b == FILL_BYTE));
    }

    #[test]
    fn image_larger_than_flash_size_fails() {
        let temp = TempDir::new().unwrap();
        let mut request = test_request(&temp, vec![test_section(&temp, "a.bin", 0x40000, &[0x01])]);
        request.fill_flash_size = Some("256KB".parse().unwrap());

        let result = merge_bin(&request);
        assert!(matches!(result, Err(MergeError::ExceedsFlashSize { .. })));
    }

    #[test]
    fn missing_input_file_names_path() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.bin");
        let request = test_request(&temp, vec![FlashSection::new(0x0, &missing)]);

        let err = merge_bin(&request).unwrap_err();
        assert!(err.to_string().contains("missing.bin"));
    }

    #[test]
    fn flash_size_parsing() {
        assert_eq!("4MB".parse::<FlashSize>().unwrap().bytes(), 4 * 1024 * 1024);
        assert_eq!("512kb".parse::<FlashSize>().unwrap().bytes(), 512 * 1024);
        assert!("3MB".parse::<FlashSize>().is_err());
        assert!("keep".parse::<FlashSize>().is_err());
    }

    #[test]
    fn address_parsing() {
        assert_eq!(parse_address("0x9000").unwrap(), 0x9000);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert!(parse_address("nine").is_err());
    }
}
