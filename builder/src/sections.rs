// Licensed under the Apache-2.0 license

//! Assembly of the flash sections which make up the unified image, and of the merge command
//! placing them.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use fw_bundler::{Chip, FlashSection, FlashSize, MergeRequest};
use log::info;

use crate::partitions::PartitionTable;

/// A binary to place in the unified image.  The address is kept as written so it can be handed
/// to the merge unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub address: String,
    pub file: String,
}

impl Section {
    pub fn new(address: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            file: file.into(),
        }
    }

    /// Parse an `"<address> <file>"` entry.  The file is everything after the first run of
    /// whitespace, so paths containing spaces survive.
    pub fn parse(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        let (address, file) = entry
            .split_once(char::is_whitespace)
            .ok_or_else(|| anyhow!("Flash image '{entry}' is not of the form '<address> <file>'"))?;
        Ok(Section::new(address, file.trim_start()))
    }

    /// The numeric address, if it parses as hex (`0x` prefixed) or decimal.
    pub fn parsed_address(&self) -> Option<u64> {
        clap_num::maybe_hex::<u64>(&self.address).ok()
    }
}

/// Parse the images the build system declared for flashing, keeping their order.
pub fn declared_sections(images: &[String]) -> Result<Vec<Section>> {
    images.iter().map(|image| Section::parse(image)).collect()
}

/// Append a section for every partition whose offset is not already covered by a section.  The
/// binary backing a partition is assumed to be `<build_dir>/<name>.bin`.
///
/// `app_offset` is covered by the application binary, which the merge command appends after all
/// sections.  Sections whose address does not parse never cover a partition.  Returns the
/// sections which were added, in partition table order.
pub fn add_missing_partitions(
    sections: &mut Vec<Section>,
    table: &PartitionTable,
    build_dir: &Path,
    app_offset: Option<u64>,
) -> Vec<Section> {
    let mut covered: Vec<u64> = sections.iter().filter_map(Section::parsed_address).collect();
    covered.extend(app_offset);

    let mut added = Vec::new();
    for partition in &table.partitions {
        if covered.contains(&partition.offset) {
            continue;
        }

        let file = build_dir.join(format!("{}.bin", partition.name));
        let section = Section::new(
            format!("{:#x}", partition.offset),
            file.to_string_lossy().into_owned(),
        );
        info!("Adding missing partition: {} | {}", section.address, section.file);
        covered.push(partition.offset);
        added.push(section);
    }

    sections.extend(added.iter().cloned());
    added
}

/// The full set of arguments for a merge: the chip, the output image, and the `(address, file)`
/// pairs in the order they were assembled.  The application image is always the last pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCommand {
    pub chip: String,
    pub output: PathBuf,
    pub pairs: Vec<Section>,
}

impl MergeCommand {
    pub fn new(
        chip: &str,
        output: &Path,
        sections: &[Section],
        app_offset: &str,
        firmware: &Path,
    ) -> Self {
        let mut pairs = sections.to_vec();
        pairs.push(Section::new(app_offset, firmware.to_string_lossy()));
        Self {
            chip: chip.to_string(),
            output: output.to_path_buf(),
            pairs,
        }
    }

    /// The command as a flat argument list, in the form `xtask merge-bin` accepts.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "merge-bin".to_string(),
            "--chip".to_string(),
            self.chip.clone(),
            "-o".to_string(),
            self.output.to_string_lossy().into_owned(),
        ];
        for pair in &self.pairs {
            args.push(pair.address.clone());
            args.push(pair.file.clone());
        }
        args
    }

    /// Fail if two pairs target the same address.  Addresses which do not parse are left for
    /// [`MergeCommand::to_request`] to report.
    pub fn check_unique_addresses(&self) -> Result<()> {
        let mut seen: HashMap<u64, &Section> = HashMap::new();
        for pair in &self.pairs {
            let Some(address) = pair.parsed_address() else {
                continue;
            };
            if let Some(previous) = seen.insert(address, pair) {
                bail!(
                    "Flash address {address:#x} is used by both '{}' and '{}'",
                    previous.file,
                    pair.file
                );
            }
        }
        Ok(())
    }

    /// Convert the command into a typed merge request.
    ///
    /// This could fail if the chip is unknown or an address does not parse.
    pub fn to_request(
        &self,
        target_offset: u64,
        fill_flash_size: Option<FlashSize>,
    ) -> Result<MergeRequest> {
        let chip: Chip = self.chip.parse()?;
        let sections = self
            .pairs
            .iter()
            .map(|pair| {
                let address = fw_bundler::parse_address(&pair.address)
                    .with_context(|| format!("Invalid address for '{}'", pair.file))?;
                Ok(FlashSection::new(address, &pair.file))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut request = MergeRequest::new(chip, &self.output, sections);
        request.target_offset = target_offset;
        request.fill_flash_size = fill_flash_size;
        Ok(request)
    }
}

impl fmt::Display for MergeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args().join(" "))
    }
}
