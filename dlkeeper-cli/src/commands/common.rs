//! Formatting and argument parsing shared across CLI commands.

use chrono::{DateTime, NaiveDate, Utc};
use console::{style, StyledObject};
use dlkeeper::{DownloadItem, DownloadState};

/// Parse an RFC 3339 timestamp or a plain `YYYY-MM-DD` date (midnight UTC).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| format!("expected RFC 3339 or YYYY-MM-DD, got '{value}'"))
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn state_label(item: &DownloadItem) -> StyledObject<String> {
    let label = item.state().to_string();
    match item.state() {
        DownloadState::Complete if item.file_externally_removed() => {
            style(format!("{label} (missing)")).yellow()
        }
        DownloadState::Complete => style(label).green(),
        DownloadState::InProgress if item.is_dangerous() => style(format!("{label} (dangerous)")).red(),
        DownloadState::InProgress => style(label).cyan(),
        DownloadState::Cancelled | DownloadState::Interrupted | DownloadState::Removing => {
            style(label).dim()
        }
    }
}

fn size_label(item: &DownloadItem) -> String {
    match item.total_bytes() {
        Some(total) if total != item.received_bytes() => format!(
            "{} / {}",
            format_size(item.received_bytes()),
            format_size(total)
        ),
        _ => format_size(item.received_bytes()),
    }
}

/// Print one line per download.
pub fn print_downloads(items: &[DownloadItem]) {
    if items.is_empty() {
        println!("No downloads.");
        return;
    }

    println!(
        "{:>6}  {:<16}  {:<20}  {:<19}  {}",
        style("HANDLE").bold(),
        style("STATE").bold(),
        style("SIZE").bold(),
        style("STARTED").bold(),
        style("PATH").bold()
    );
    for item in items {
        let path = item
            .full_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>6}  {:<16}  {:<20}  {:<19}  {}",
            item.db_handle().to_string(),
            state_label(item),
            size_label(item),
            item.start_time().format("%Y-%m-%d %H:%M:%S"),
            path
        );
        println!("        {}", style(item.url()).dim());
    }
    println!();
    println!("{} download(s)", items.len());
}
