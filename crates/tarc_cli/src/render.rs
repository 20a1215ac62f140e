//! Print a report for humans, or as JSON.
use std::io::{self, Write};

use tarc::{
    reconcile::{ReconciliationReport, TorrentState},
    utils::{to_human_readable, to_percent},
};

use crate::error::Error;

pub fn json(report: &ReconciliationReport, mut out: impl Write) -> Result<(), Error> {
    serde_json::to_writer_pretty(&mut out, report)?;
    writeln!(out)?;
    Ok(())
}

pub fn text(report: &ReconciliationReport, mut out: impl Write) -> io::Result<()> {
    let elapsed = (report.finished_at - report.started_at).as_seconds_f64();
    let bytes: u64 = report.files.iter().map(|f| f.record.size_bytes).sum();

    writeln!(
        out,
        "{}: {} files, {}, {} torrents in {elapsed:.2}s",
        report.root.display(),
        report.files.len(),
        to_human_readable(bytes),
        report.torrents.len(),
    )?;
    writeln!(out)?;

    if !report.torrents.is_empty() {
        writeln!(
            out,
            "{:<40}  {:<10}  {:>5}  {:>10}  {:>8}  {:>8}  {:>8}  {:>8}  {:>7}  NAME",
            "INFO HASH",
            "STATE",
            "FILES",
            "SIZE",
            "PIECES",
            "VERIFIED",
            "CORRUPT",
            "MISSING",
            "DONE"
        )?;
    }
    for t in &report.torrents {
        let state = match t.state {
            TorrentState::Complete => "complete",
            TorrentState::Incomplete => "incomplete",
            TorrentState::Absent => "absent",
        };
        writeln!(
            out,
            "{:<40}  {:<10}  {:>5}  {:>10}  {:>8}  {:>8}  {:>8}  {:>8}  {:>7}  {}",
            t.info_hash.to_string(),
            state,
            t.file_count,
            to_human_readable(t.total_length),
            t.piece_count,
            t.counts.verified,
            t.counts.corrupt,
            t.counts.missing,
            to_percent(t.completion),
            t.name,
        )?;
        for file in &t.missing_files {
            writeln!(out, "    missing {file}")?;
        }
        for e in &t.read_errors {
            writeln!(out, "    piece {}: {}", e.piece, e.error)?;
        }
    }

    let untracked: Vec<_> = report.untracked().collect();
    if !untracked.is_empty() {
        writeln!(out)?;
        writeln!(out, "untracked files:")?;
        for f in untracked {
            writeln!(
                out,
                "    {} ({})",
                f.record.relative_path,
                to_human_readable(f.record.size_bytes)
            )?;
        }
    }

    if !report.skipped.is_empty() {
        writeln!(out)?;
        writeln!(out, "skipped torrents:")?;
        for s in &report.skipped {
            writeln!(out, "    {}: {}", s.origin, s.error)?;
        }
    }

    if !report.scan_errors.is_empty() {
        writeln!(out)?;
        writeln!(out, "scan errors:")?;
        for e in &report.scan_errors {
            writeln!(out, "    {}: {}", e.path, e.message)?;
        }
    }

    Ok(())
}
