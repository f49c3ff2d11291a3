// Licensed under the Apache-2.0 license

use std::path::Path;

use anyhow::Result;
use unified_builder::partitions::PartitionTable;

pub(crate) fn show(csv: &Path) -> Result<()> {
    let table = PartitionTable::from_file(csv)?;
    println!("{}", render(&table));
    Ok(())
}

fn render(table: &PartitionTable) -> String {
    let mut out = format!(
        "{:<16} {:<6} {:<10} {:>10} {:>10} {:>10}\n",
        "Name", "Type", "SubType", "Offset", "Size", "End"
    );
    for p in &table.partitions {
        out += &format!(
            "{:<16} {:<6} {:<10} {:>10} {:>10} {:>10}\n",
            p.name,
            p.kind,
            p.subtype,
            format!("{:#x}", p.offset),
            format!("{:#x}", p.size),
            format!("{:#x}", p.end()),
        );
    }
    out += &format!("Image size: {:#x}", table.max_offset);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_table() {
        let table = PartitionTable::parse(
            "nvs, data, nvs, 0x9000, 0x5000\napp0, app, ota_0, 0x10000, 0x140000\n",
        );
        let out = render(&table);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("nvs"));
        assert!(lines[2].contains("0x150000"));
        assert_eq!(lines[3], "Image size: 0x150000");
    }
}
