// Licensed under the Apache-2.0 license

//! Combining the bootloader, partition table, data partitions, and application into one image
//! which can be flashed at offset 0.

use std::path::PathBuf;

use anyhow::{Context, Result};
use fw_bundler::FlashSize;
use log::info;

use crate::{
    env::BuildEnv,
    partitions::{resolve_partition_csv, PartitionTable},
    sections::{add_missing_partitions, declared_sections, MergeCommand},
};

/// The merge command for the unified binary of `env`.
///
/// This fails if the application offset, chip, or partition table is not configured, if the
/// partition table file does not exist, or if two sections target the same address.
pub fn unified_merge_command(env: &BuildEnv) -> Result<MergeCommand> {
    let app_offset = env.app_offset()?;
    let chip = env.board_mcu()?;
    let build_dir = env.build_dir()?;
    let progname = env.progname()?;
    let output = build_dir.join(format!("FW_{progname}.bin"));
    let firmware = build_dir.join(format!("{progname}.bin"));

    let images = env.flash_extra_images()?;
    info!("FLASH_EXTRA_IMAGES: {images:?}");

    let partition_csv = resolve_partition_csv(env)?;
    let table = PartitionTable::from_file(&partition_csv)?;
    info!(
        "Partition table {} holds {} partitions, image size {:#x}",
        partition_csv.display(),
        table.partitions.len(),
        table.max_offset
    );

    let mut sections = declared_sections(&images)?;
    let app_address = fw_bundler::parse_address(&app_offset).ok();
    add_missing_partitions(&mut sections, &table, &build_dir, app_address);

    let command = MergeCommand::new(&chip, &output, &sections, &app_offset, &firmware);
    command.check_unique_addresses()?;
    Ok(command)
}

/// Generate the unified binary `<build dir>/FW_<program name>.bin`.
pub fn create_unified_binary(env: &BuildEnv) -> Result<PathBuf> {
    info!("Generating combined binary for serial flashing...");

    let command = unified_merge_command(env)?;

    info!("    Offset | File");
    for pair in &command.pairs {
        info!(" - {} | {}", pair.address, pair.file);
    }
    info!("Using merge arguments: {command}");

    let target_offset = match env.merge.target_offset.as_deref() {
        Some(offset) => fw_bundler::parse_address(&env.subst(offset)?)
            .context("Invalid merge target offset")?,
        None => 0,
    };
    let fill_flash_size = env
        .merge
        .fill_flash_size
        .as_deref()
        .map(str::parse::<FlashSize>)
        .transpose()?;

    let request = command.to_request(target_offset, fill_flash_size)?;
    let summary = fw_bundler::merge_bin(&request)?;
    info!(
        "Wrote {} ({:#x} bytes, {} sections)",
        summary.output.display(),
        summary.image_size,
        summary.sections
    );
    Ok(summary.output)
}
