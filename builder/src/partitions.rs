// Licensed under the Apache-2.0 license

//! Parsing of partition table CSV files.
//!
//! Each row of a partition table is `name, type, subtype, offset, size[, flags]`.  Parsing is
//! best effort: comments, blank lines, rows with too few fields, and rows whose offset or size
//! is not a hex number are skipped.  Only failing to read the file is an error.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::debug;

use crate::env::{BuildEnv, PARTITIONS_OPTION};

const MIN_FIELDS: usize = 5;

/// A region of flash described by one partition table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub kind: String,
    pub subtype: String,
    pub offset: u64,
    pub size: u64,
    pub flags: Option<String>,
}

impl Partition {
    /// The first address after the partition.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < MIN_FIELDS {
            return None;
        }

        let offset = parse_hex(fields[3])?;
        let size = parse_hex(fields[4])?;
        let end = offset.checked_add(size)?;
        debug!("Partition {} spans {offset:#x}..{end:#x}", fields[0]);

        Some(Partition {
            name: fields[0].to_string(),
            kind: fields[1].to_string(),
            subtype: fields[2].to_string(),
            offset,
            size,
            flags: fields.get(5).filter(|f| !f.is_empty()).map(|f| f.to_string()),
        })
    }
}

/// The partitions of a table, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    pub partitions: Vec<Partition>,

    /// The highest end address of any partition, i.e. the size of an image holding every
    /// partition.
    pub max_offset: u64,
}

impl PartitionTable {
    pub fn parse(contents: &str) -> Self {
        let mut table = PartitionTable::default();
        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(partition) = Partition::parse(line) {
                table.max_offset = table.max_offset.max(partition.end());
                table.partitions.push(partition);
            }
        }
        table
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read partition table '{}'", path.display()))?;
        Ok(Self::parse(&contents))
    }
}

/// Parse a hex number with an optional `0x` prefix.
fn parse_hex(s: &str) -> Option<u64> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Determine the partition table CSV of the project.  A relative path is resolved against the
/// project directory.
///
/// This fails without touching the file system if the `board_build.partitions` option is not set,
/// and fails if the resolved path is not an existing file.
pub fn resolve_partition_csv(env: &BuildEnv) -> Result<PathBuf> {
    let Some(option) = env.project_option(PARTITIONS_OPTION) else {
        bail!("'{PARTITIONS_OPTION}' not defined in the project options");
    };

    let mut path = PathBuf::from(env.subst(option)?);
    if path.is_relative() {
        path = env.project_dir()?.join(path);
    }

    if !path.is_file() {
        bail!("Partition CSV file '{}' not found", path.display());
    }
    Ok(path)
}
