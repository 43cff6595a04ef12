//! Decision event log — one structured event per gate rejection, admission,
//! displacement, rejection and exit.
//!
//! Sinks are fire-and-forget: `emit` returns nothing and a failing sink logs
//! and carries on, so the audit trail can never block a decision.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use flowgate_core::domain::CycleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    GateRejected,
    Admitted,
    Displaced,
    AdmissionRejected,
    Exited,
    ExitFailed,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::GateRejected => "gate_rejected",
            DecisionKind::Admitted => "admitted",
            DecisionKind::Displaced => "displaced",
            DecisionKind::AdmissionRejected => "admission_rejected",
            DecisionKind::Exited => "exited",
            DecisionKind::ExitFailed => "exit_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub cycle: CycleId,
    pub at: DateTime<Utc>,
    pub symbol: String,
    pub kind: DecisionKind,
    pub reason: String,
    /// Scores, thresholds and deltas the decision compared.
    pub evidence: BTreeMap<String, f64>,
    /// Counterparty symbol: the victim of a displacement, or the candidate
    /// that displaced this position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
    /// Tier that chose a displacement victim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

impl DecisionEvent {
    pub fn new(cycle: CycleId, at: DateTime<Utc>, symbol: &str, kind: DecisionKind, reason: impl Into<String>) -> Self {
        Self {
            cycle,
            at,
            symbol: symbol.to_string(),
            kind,
            reason: reason.into(),
            evidence: BTreeMap::new(),
            related: None,
            tier: None,
        }
    }

    pub fn with_evidence(mut self, evidence: BTreeMap<String, f64>) -> Self {
        self.evidence.extend(evidence);
        self
    }

    pub fn with_related(mut self, symbol: &str) -> Self {
        self.related = Some(symbol.to_string());
        self
    }

    pub fn with_tier(mut self, tier: &str) -> Self {
        self.tier = Some(tier.to_string());
        self
    }
}

/// Consumer of decision events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DecisionEvent);

    fn flush(&self) {}
}

/// Mirrors events into the tracing log.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &DecisionEvent) {
        match event.kind {
            DecisionKind::GateRejected => debug!(
                cycle = %event.cycle,
                symbol = %event.symbol,
                reason = %event.reason,
                "gate rejected"
            ),
            DecisionKind::ExitFailed => warn!(
                cycle = %event.cycle,
                symbol = %event.symbol,
                reason = %event.reason,
                "exit failed"
            ),
            kind => info!(
                cycle = %event.cycle,
                symbol = %event.symbol,
                kind = kind.as_str(),
                reason = %event.reason,
                related = event.related.as_deref().unwrap_or(""),
                "decision"
            ),
        }
    }
}

/// Append-only JSONL log, one event per line.
pub struct JsonlEventLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonlEventLog {
    /// Open (creating parent directories) for append.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, event: &DecisionEvent) -> io::Result<()> {
        let json = serde_json::to_string(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "event log lock poisoned"))?;
        match guard.as_mut() {
            Some(w) => writeln!(w, "{json}"),
            None => Ok(()),
        }
    }
}

impl EventSink for JsonlEventLog {
    fn emit(&self, event: &DecisionEvent) {
        if let Err(e) = self.write_line(event) {
            warn!(path = %self.path.display(), error = %e, "event log write failed; event dropped");
        }
    }

    fn flush(&self) {
        let result = match self.writer.lock() {
            Ok(mut guard) => guard.as_mut().map_or(Ok(()), |w| w.flush()),
            Err(_) => Ok(()),
        };
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "event log flush failed");
        }
    }
}

impl Drop for JsonlEventLog {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Keeps events in memory. Used by tests and the `--once` summary.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DecisionEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DecisionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn of_kind(&self, kind: DecisionKind) -> Vec<DecisionEvent> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &DecisionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Broadcasts to several sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: std::sync::Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &DecisionEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }

    fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}

/// Read a JSONL event log. Malformed lines are skipped.
pub fn read_events(path: &Path) -> Result<Vec<DecisionEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut events = Vec::new();
    for line in io::BufReader::new(file).lines() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DecisionEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => debug!(error = %e, "skipping malformed event line"),
        }
    }
    Ok(events)
}

/// Export events as CSV. Evidence is flattened to `key=value` pairs joined by `;`.
///
/// Columns: cycle, at, symbol, kind, reason, related, tier, evidence
pub fn export_events_csv(events: &[DecisionEvent]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["cycle", "at", "symbol", "kind", "reason", "related", "tier", "evidence"])?;
    for e in events {
        let evidence = e
            .evidence
            .iter()
            .map(|(k, v)| format!("{k}={v:.6}"))
            .collect::<Vec<_>>()
            .join(";");
        wtr.write_record([
            &e.cycle.0.to_string(),
            &e.at.to_rfc3339(),
            &e.symbol,
            e.kind.as_str(),
            &e.reason,
            e.related.as_deref().unwrap_or(""),
            e.tier.as_deref().unwrap_or(""),
            &evidence,
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}
