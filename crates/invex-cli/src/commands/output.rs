//! Report writers: summary CSV, record JSON and console summaries.

use std::fs;
use std::path::Path;
use std::time::Duration;

use console::style;

use invex_core::batch::{BatchReport, TaskOutcome};
use invex_core::classify::Placement;
use invex_core::models::invoice::{Field, InvoiceRecord};

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output
    Csv,
    /// Plain text summary
    Text,
}

const SUMMARY_HEADER: [&str; 16] = [
    "filename",
    "status",
    "attempts",
    "invoice_number",
    "invoice_type",
    "issue_date",
    "seller_name",
    "seller_tax_id",
    "buyer_name",
    "buyer_tax_id",
    "pre_tax_amount",
    "tax_amount",
    "total_amount",
    "validation_status",
    "extraction_mode",
    "error",
];

/// Write one summary row per task.
pub fn write_summary(path: &Path, report: &BatchReport) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(SUMMARY_HEADER)?;
    for outcome in &report.outcomes {
        wtr.write_record(summary_row(outcome))?;
    }
    wtr.flush()?;
    Ok(())
}

fn summary_row(outcome: &TaskOutcome) -> Vec<String> {
    let filename = outcome
        .path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut row = vec![
        filename,
        outcome.status.to_string(),
        outcome.attempts.to_string(),
    ];
    match &outcome.record {
        Some(record) => {
            row.extend(record_columns(record));
            row.push(record.validation_status.as_str().to_string());
            row.push(record.extraction_mode.to_string());
        }
        None => row.extend(std::iter::repeat_n(String::new(), 12)),
    }
    row.push(outcome.last_error.clone().unwrap_or_default());
    row
}

fn record_columns(record: &InvoiceRecord) -> Vec<String> {
    let fields = &record.fields;
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    vec![
        text(&fields.invoice_number),
        text(&fields.invoice_type),
        fields.issue_date.map(|d| d.to_string()).unwrap_or_default(),
        text(&fields.seller_name),
        text(&fields.seller_tax_id),
        text(&fields.buyer_name),
        text(&fields.buyer_tax_id),
        fields.display(Field::PreTaxAmount).unwrap_or_default(),
        fields.display(Field::TaxAmount).unwrap_or_default(),
        fields.display(Field::TotalAmount).unwrap_or_default(),
    ]
}

/// Write all records as a JSON array.
pub fn write_records(path: &Path, report: &BatchReport) -> anyhow::Result<()> {
    let records: Vec<&InvoiceRecord> = report.records().collect();
    fs::write(path, serde_json::to_string_pretty(&records)?)?;
    Ok(())
}

/// Render records in the requested format.
pub fn format_records(records: &[&InvoiceRecord], format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(records)?),
        OutputFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(vec![]);
            wtr.write_record(&SUMMARY_HEADER[3..15])?;
            for record in records {
                let mut row = record_columns(record);
                row.push(record.validation_status.as_str().to_string());
                row.push(record.extraction_mode.to_string());
                wtr.write_record(row)?;
            }
            Ok(String::from_utf8(wtr.into_inner()?)?)
        }
        OutputFormat::Text => Ok(records
            .iter()
            .map(|r| format_record_text(r))
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

fn format_record_text(record: &InvoiceRecord) -> String {
    let mut output = String::new();
    let fields = &record.fields;
    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    output.push_str(&format!("Source: {}\n", record.source.path.display()));
    output.push_str(&format!("Invoice: {}\n", or_dash(fields.invoice_number.clone())));
    output.push_str(&format!(
        "Date: {}\n",
        or_dash(fields.issue_date.map(|d| d.to_string()))
    ));
    output.push_str(&format!(
        "Seller: {} ({})\n",
        or_dash(fields.seller_name.clone()),
        or_dash(fields.seller_tax_id.clone())
    ));
    output.push_str(&format!(
        "Buyer: {} ({})\n",
        or_dash(fields.buyer_name.clone()),
        or_dash(fields.buyer_tax_id.clone())
    ));
    output.push_str(&format!("  Pre-tax: {}\n", or_dash(fields.display(Field::PreTaxAmount))));
    output.push_str(&format!("  Tax:     {}\n", or_dash(fields.display(Field::TaxAmount))));
    output.push_str(&format!("  Total:   {}\n", or_dash(fields.display(Field::TotalAmount))));
    output.push_str(&format!(
        "Mode: {}, {}\n",
        record.extraction_mode,
        record.validation_status.as_str()
    ));
    for mismatch in &record.mismatches {
        output.push_str(&format!(
            "  ! {}: pattern {} vs model {}\n",
            mismatch.field.as_str(),
            mismatch.deterministic,
            mismatch.model
        ));
    }
    for warning in &record.warnings {
        output.push_str(&format!("  ! {}\n", warning));
    }
    output
}

/// Print the end-of-run summary.
pub fn print_report(report: &BatchReport, elapsed: Duration) {
    let stats = &report.stats;
    println!();
    println!(
        "{} Processed {} documents in {:?} ({} strategy)",
        style("✓").green(),
        stats.total,
        elapsed,
        report.strategy
    );
    println!(
        "   {} done ({} resumed), {} failed, {} skipped, {} pending",
        style(stats.done).green(),
        stats.resumed,
        style(stats.failed).red(),
        style(stats.skipped).yellow(),
        stats.pending
    );
    println!(
        "   {} validated, {} mismatched, {} unvalidated",
        style(stats.validated).green(),
        style(stats.mismatched).yellow(),
        stats.unvalidated
    );
    if stats.placed + stats.unplaced + stats.not_filed > 0 {
        println!(
            "   {} classified, {} not filed, {} left in place",
            stats.placed,
            stats.not_filed,
            stats.unplaced
        );
    }
    if stats.unsaved > 0 {
        println!(
            "{} {} results were not saved to the progress log and will be processed again",
            style("!").red(),
            stats.unsaved
        );
    }
    if report.cancelled {
        println!(
            "{} Batch was interrupted; run again to continue.",
            style("!").yellow()
        );
    }

    let failed: Vec<_> = report.failures().collect();
    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for outcome in failed {
            println!(
                "  - {}: {}",
                outcome.path.display(),
                outcome.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    let unplaced: Vec<_> = report
        .outcomes
        .iter()
        .filter_map(|o| match &o.placement {
            Placement::Unplaced { reason } | Placement::Skipped { reason } => Some((o, reason)),
            _ => None,
        })
        .collect();
    if !unplaced.is_empty() {
        println!();
        println!("{}", style("Not classified (kept at original location):").yellow());
        for (outcome, reason) in unplaced {
            println!("  - {}: {}", outcome.path.display(), reason);
        }
    }
}
