//! Output formatting for CLI commands

use blobtally::inventory::{ProgressMap, RunSummary};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

/// Format a byte count in decimal units
///
/// Examples:
/// - 500 -> "500 B"
/// - 16000000 -> "16.0 MB"
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1000;
    const MB: u64 = KB * 1000;
    const GB: u64 = MB * 1000;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Parse a size like `16MB` or `16000000` into bytes (decimal units)
pub fn parse_size(size_str: &str) -> Result<u64, String> {
    let size_str = size_str.trim().to_uppercase();
    let split = size_str
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(size_str.len());
    let (number, unit) = size_str.split_at(split);

    let value: f64 = number.parse().map_err(|_| size_str.clone())?;
    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "KB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        _ => return Err(size_str.clone()),
    };
    Ok((value * multiplier as f64).round() as u64)
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);
    table
}

/// Two-column table of run counters
pub fn summary_table(summary: &RunSummary) -> Table {
    let mut table = new_table(&["Metric", "Value"]);
    let rows: [(&str, u64); 16] = [
        ("Accounts listed", summary.accounts_listed),
        ("Accounts filtered out", summary.accounts_filtered),
        ("Accounts already complete", summary.accounts_already_complete),
        ("Accounts skipped (no keys)", summary.accounts_skipped),
        ("Accounts failed", summary.accounts_failed),
        ("Accounts scanned", summary.accounts_scanned),
        ("Containers filtered out", summary.containers_filtered),
        ("Containers already complete", summary.containers_already_complete),
        ("Containers resumed", summary.containers_resumed),
        ("Containers failed", summary.containers_failed),
        ("Containers scanned", summary.containers_scanned),
        ("Pages", summary.pages),
        ("Objects", summary.objects),
        ("Chunks written", summary.chunks_written),
        ("Chunks published", summary.chunks_created),
        ("Chunks already published", summary.chunks_skipped),
    ];
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    table.add_row(vec![
        Cell::new("Duration"),
        Cell::new(format!("{:.1}s", summary.duration_ms as f64 / 1000.0)),
    ]);
    if !summary.failed_units.is_empty() {
        table.add_row(vec![
            Cell::new("Failed units").fg(Color::Red),
            Cell::new(summary.failed_units.join("\n")).fg(Color::Red),
        ]);
    }
    table
}

/// One row per progress marker
pub fn progress_table(map: &ProgressMap) -> Table {
    let mut table = new_table(&[
        "Unit",
        "Status",
        "Published",
        "Cursor",
        "Run",
        "Volume",
        "Bytes",
        "Updated",
    ]);
    for (key, marker) in map {
        let color = match marker.status.as_str() {
            "complete" => Color::Green,
            "listed" => Color::Yellow,
            _ => Color::Grey,
        };
        let (run, volume, bytes) = match &marker.chunk {
            Some(chunk) => (
                chunk.run_id.to_string(),
                chunk.volume.to_string(),
                format_size(chunk.bytes),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        table.add_row(vec![
            Cell::new(key),
            Cell::new(marker.status.as_str()).fg(color),
            Cell::new(if marker.published { "yes" } else { "no" }),
            Cell::new(marker.cursor.as_deref().unwrap_or("-")),
            Cell::new(run),
            Cell::new(volume),
            Cell::new(bytes),
            Cell::new(marker.updated_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1_500), "1.5 KB");
        assert_eq!(format_size(16_000_000), "16.0 MB");
        assert_eq!(format_size(2_000_000_000), "2.0 GB");
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("16MB").unwrap(), 16_000_000);
        assert_eq!(parse_size("16mb").unwrap(), 16_000_000);
        assert_eq!(parse_size("1.5KB").unwrap(), 1_500);
        assert!(parse_size("12XB").is_err());
        assert!(parse_size("MB").is_err());
    }

    #[test]
    fn test_summary_table_lists_failures() {
        let summary = RunSummary {
            objects: 12,
            failed_units: vec!["acct/logs".to_string()],
            ..Default::default()
        };
        let rendered = summary_table(&summary).to_string();
        assert!(rendered.contains("acct/logs"));
        assert!(rendered.contains("Objects"));
    }

    #[test]
    fn test_summary_table_counts_failed_accounts_and_containers() {
        let summary = RunSummary {
            accounts_failed: 3,
            containers_failed: 7,
            ..Default::default()
        };
        let rendered = summary_table(&summary).to_string();
        let row = |label: &str| {
            rendered
                .lines()
                .find(|line| line.contains(label))
                .map(str::to_string)
                .unwrap_or_default()
        };
        assert!(row("Accounts failed").contains('3'));
        assert!(row("Containers failed").contains('7'));
    }
}
