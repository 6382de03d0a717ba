//! Operator-facing rendering of a finished run.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::credentials::AuthKind;
use crate::harness::{RunReport, WorkerResult};
use crate::metrics::stats::{LatencySummary, OpenLatencyStats, duration_micros};
use crate::output::ReportFormat;

/// Column name shown next to the query value, e.g. `release_version` for
/// `SELECT release_version FROM system.local`.
pub fn value_label(query: &str) -> String {
    let lower = query.to_ascii_lowercase();
    let Some(select) = lower.find("select ") else {
        return "value".to_string();
    };
    let start = select + "select ".len();
    let end = lower[start..].find(" from ").map(|i| start + i).unwrap_or(query.len());
    let column = query[start..end].trim();
    if column.is_empty() || column.contains(',') || column == "*" {
        "value".to_string()
    } else {
        column.to_string()
    }
}

pub struct Reporter {
    pub format: ReportFormat,
    pub run_id: String,
    pub auth: AuthKind,
    pub target: String,
    pub query: String,
}

#[derive(Serialize)]
struct WorkerRecord<'a> {
    run_id: &'a str,
    worker: usize,
    elapsed_open_us: u64,
    connected: bool,
    rows: usize,
    value: Option<&'a str>,
    open_error: Option<String>,
    close_error: Option<String>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    run_id: &'a str,
    started_at: DateTime<Utc>,
    auth_mode: AuthKind,
    target: &'a str,
    query: &'a str,
    total_elapsed_us: u64,
    summary: LatencySummary,
    workers: Vec<WorkerRecord<'a>>,
}

impl Reporter {
    pub fn render(&self, report: &RunReport) -> Result<String> {
        match self.format {
            ReportFormat::Text => Ok(self.render_text(report)),
            ReportFormat::Csv => self.render_csv(report),
            ReportFormat::Json => self.render_json(report),
        }
    }

    fn record<'a>(&'a self, r: &'a WorkerResult) -> WorkerRecord<'a> {
        WorkerRecord {
            run_id: &self.run_id,
            worker: r.number(),
            elapsed_open_us: duration_micros(r.elapsed_open),
            connected: r.connected(),
            rows: r.rows,
            value: r.value.as_deref(),
            open_error: r.open_error.as_ref().map(ToString::to_string),
            close_error: r.close_error.as_ref().map(ToString::to_string),
        }
    }

    pub fn worker_lines(&self, r: &WorkerResult) -> Vec<String> {
        if let Some(e) = &r.open_error {
            return vec![format!(
                "worker {}: failed to connect after {:?}: {e}",
                r.number(),
                r.elapsed_open
            )];
        }
        let value = r.value.as_deref().unwrap_or("<no rows>");
        let mut lines = vec![format!(
            "worker {}: connected in {:?}, {} = {value}",
            r.number(),
            r.elapsed_open,
            value_label(&self.query)
        )];
        if let Some(e) = &r.close_error {
            lines.push(format!("warning: worker {}: error running query: {e}", r.number()));
        }
        lines
    }

    fn render_text(&self, report: &RunReport) -> String {
        let mut out = String::new();
        for r in &report.results {
            for line in self.worker_lines(r) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        let s = OpenLatencyStats::from_results(&report.results).summary();
        out.push_str(&format!(
            "summary: {} workers, {} connected, {} failed, {} warnings\n",
            report.results.len(),
            s.connected,
            s.failed,
            s.warnings
        ));
        if s.connected > 0 {
            out.push_str(&format!(
                "open latency: min {:?}, p50 {:?}, p95 {:?}, p99 {:?}, max {:?}, mean {:?}\n",
                s.min, s.p50, s.p95, s.p99, s.max, s.mean
            ));
        }
        out.push_str(&format!("total run time: {:?}\n", report.total_elapsed));
        out
    }

    fn render_csv(&self, report: &RunReport) -> Result<String> {
        let mut w = csv::Writer::from_writer(Vec::new());
        for r in &report.results {
            w.serialize(self.record(r))?;
        }
        let bytes = w.into_inner().map_err(|e| anyhow::anyhow!("flushing csv: {}", e.error()))?;
        Ok(String::from_utf8(bytes)?)
    }

    fn render_json(&self, report: &RunReport) -> Result<String> {
        let doc = JsonReport {
            run_id: &self.run_id,
            started_at: report.started_at,
            auth_mode: self.auth,
            target: &self.target,
            query: &self.query,
            total_elapsed_us: duration_micros(report.total_elapsed),
            summary: OpenLatencyStats::from_results(&report.results).summary(),
            workers: report.results.iter().map(|r| self.record(r)).collect(),
        };
        let mut body = serde_json::to_string_pretty(&doc)?;
        body.push('\n');
        Ok(body)
    }
}
