//! Display utilities for formatting CLI output.
//!
//! This module provides table row structures and formatting functions for
//! presenting batch reports and the driver registry in a human-readable format.

use tabled::{Table, Tabled};

use geoclip_core::drivers::Driver;
use geoclip_core::types::{BatchReport, ClipOutcome, EntryReport};

/// Table row representation for one manifest entry of a batch report.
#[derive(Tabled)]
pub struct EntryRow {
    /// Dataset name, or `#<index>` for records without one.
    #[tabled(rename = "Dataset")]
    pub name: String,
    /// `done`, `skipped` or `failed`.
    #[tabled(rename = "Status")]
    pub status: String,
    /// Output path, skip reason or failure message.
    #[tabled(rename = "Detail")]
    pub detail: String,
    /// Wall time spent on the entry.
    #[tabled(rename = "Time")]
    pub time: String,
}

impl From<&EntryReport> for EntryRow {
    fn from(entry: &EntryReport) -> Self {
        let detail = match &entry.outcome {
            ClipOutcome::Done(path) => path.display().to_string(),
            ClipOutcome::Skipped(reason) => reason.to_string(),
            ClipOutcome::Failed { kind, message } => format!("{kind}: {message}"),
        };
        Self {
            name: entry.name.clone(),
            status: entry.outcome.status().to_string(),
            detail,
            time: format!("{:.1?}", entry.elapsed),
        }
    }
}

/// Table row representation for displaying driver information.
#[derive(Tabled)]
pub struct DriverRow {
    /// Short identifier for the driver (e.g., `GTiff`, `GeoJSON`).
    #[tabled(rename = "Short Name")]
    pub short_name: String,
    /// Full descriptive name of the driver format.
    #[tabled(rename = "Long Name")]
    pub long_name: String,
    /// Raster or vector.
    #[tabled(rename = "Kind")]
    pub kind: String,
    /// Claimed file extensions.
    #[tabled(rename = "Extensions")]
    pub extensions: String,
    /// Support status for reading data from this format.
    #[tabled(rename = "Read")]
    pub read: String,
    /// Support status for writing data to this format.
    #[tabled(rename = "Write")]
    pub write: String,
}

impl From<&Driver> for DriverRow {
    fn from(d: &Driver) -> Self {
        Self {
            short_name: d.short_name.to_string(),
            long_name: d.long_name.to_string(),
            kind: d.kind.to_string(),
            extensions: d.extensions.join(", "),
            read: d.capabilities.read.as_str().to_string(),
            write: d.capabilities.write.as_str().to_string(),
        }
    }
}

/// Render the per-entry table of a batch report.
#[must_use]
pub fn report_table(report: &BatchReport) -> String {
    let rows: Vec<EntryRow> = report.entries.iter().map(EntryRow::from).collect();
    Table::new(rows).to_string()
}

/// One-line batch totals.
#[must_use]
pub fn report_summary(report: &BatchReport) -> String {
    format!(
        "{} done, {} skipped, {} failed in {:.1?}",
        report.succeeded(),
        report.skipped(),
        report.failed(),
        report.elapsed
    )
}

/// Display a batch report as a table followed by the totals.
pub fn display_report(report: &BatchReport) {
    if report.entries.is_empty() {
        println!("\nNo datasets in manifest.");
        return;
    }
    println!("\n{}", report_table(report));
    println!("\n{}", report_summary(report));
}

/// Display the driver registry in a formatted table.
pub fn display_drivers(drivers: &[Driver]) {
    println!("\nKnown Drivers ({} total):\n", drivers.len());
    let rows: Vec<DriverRow> = drivers.iter().map(DriverRow::from).collect();
    println!("{}", Table::new(rows));
}
