// Licensed under the Apache-2.0 license

//! The arguments for running the merge as a standalone command.

use std::path::PathBuf;

use clap::Args;
use clap_num::maybe_hex;

use crate::{
    chip::Chip,
    error::{MergeError, MergeResult},
    merge::{parse_address, FlashSection, FlashSize, MergeRequest},
};

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    /// The chip the merged image is destined for.
    #[arg(long, value_enum)]
    pub chip: Chip,

    /// The file the merged image is written to.
    #[arg(short, long)]
    pub output: PathBuf,

    /// The flash address the merged image will be written to.  Every section address must be at
    /// or above it.
    #[arg(long, value_parser = maybe_hex::<u64>, default_value_t = 0)]
    pub target_offset: u64,

    /// Pad the merged image with erased flash up to the given flash size (e.g. 4MB).
    #[arg(long)]
    pub fill_flash_size: Option<String>,

    /// Pairs of `<address> <file>`, e.g. `0x1000 bootloader.bin 0x8000 partitions.bin`.
    #[arg(value_name = "ADDRESS FILE", num_args = 2.., required = true)]
    pub addr_filename: Vec<String>,
}

impl MergeArgs {
    /// Convert the command line arguments into a merge request.
    ///
    /// This could fail if an address does not parse, the address/file list is unbalanced, or the
    /// flash size is not supported.
    pub fn to_request(&self) -> MergeResult<MergeRequest> {
        let pairs = self.addr_filename.chunks_exact(2);
        if !pairs.remainder().is_empty() {
            return Err(MergeError::InvalidAddress(format!(
                "{} (missing file for address)",
                pairs.remainder()[0]
            )));
        }

        let sections = pairs
            .map(|pair| Ok(FlashSection::new(parse_address(&pair[0])?, &pair[1])))
            .collect::<MergeResult<Vec<_>>>()?;

        let mut request = MergeRequest::new(self.chip, &self.output, sections);
        request.target_offset = self.target_offset;
        request.fill_flash_size = self
            .fill_flash_size
            .as_deref()
            .map(str::parse::<FlashSize>)
            .transpose()?;
        Ok(request)
    }
}
