//! Failure/recovery trace parsing.
//!
//! A trace is a CSV file with a header row followed by `nodeId,timestampMicros,eventTypeCode[,...]` rows.
//! Rows starting with `#` or `//` are comments. Rows that can't be parsed are dropped.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use log::{debug, info};
use serde::Serialize;

use crate::error::TraceError;

const MICROS_TO_SECONDS: f64 = 1.0e-6;

/// Kind of nodes a trace refers to. Determines how raw event type codes are interpreted.
///
/// Codes other than the failure and recovery ones are dropped, while older trace generators
/// treated any non-failure code of a host trace as a recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceScope {
    Host,
    Vm,
}

impl TraceScope {
    /// Raw event type code denoting a failure.
    pub fn failure_code(&self) -> i64 {
        match self {
            TraceScope::Host => 2,
            TraceScope::Vm => 5,
        }
    }

    /// Raw event type code denoting a recovery.
    pub fn recovery_code(&self) -> i64 {
        match self {
            TraceScope::Host => 1,
            TraceScope::Vm => 3,
        }
    }

    fn event_kind(&self, code: i64) -> Option<TraceEventKind> {
        if code == self.failure_code() {
            Some(TraceEventKind::Failure)
        } else if code == self.recovery_code() {
            Some(TraceEventKind::Recovery)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceEventKind {
    Failure,
    Recovery,
}

/// Single trace event with timestamp relative to the simulation start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    pub timestamp: f64,
    pub node_id: String,
    pub kind: TraceEventKind,
}

/// Mapping of raw trace timestamps (microseconds) to simulation time (seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeTransform {
    /// Offset in seconds subtracted from the raw timestamp.
    pub offset: f64,
    /// Factor applied after the offset.
    pub compression: f64,
}

impl Default for TimeTransform {
    fn default() -> Self {
        Self {
            offset: 600.,
            compression: 0.001,
        }
    }
}

impl TimeTransform {
    pub fn apply(&self, raw_micros: i64) -> f64 {
        (raw_micros as f64 * MICROS_TO_SECONDS - self.offset) * self.compression
    }
}

/// Reads trace events from file.
///
/// If `active_nodes` is set, events for nodes outside of it are discarded.
pub fn parse_trace<P: AsRef<Path>>(
    path: P,
    scope: TraceScope,
    transform: TimeTransform,
    active_nodes: Option<&HashSet<String>>,
) -> Result<Vec<TraceEvent>, TraceError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| TraceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let events = read_trace(file, scope, transform, active_nodes).map_err(|source| {
        TraceError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;
    info!("Read {} {:?} events from {}", events.len(), scope, path.display());
    Ok(events)
}

/// Reads trace events from any reader, see [`parse_trace`].
pub fn read_trace<R: Read>(
    input: R,
    scope: TraceScope,
    transform: TimeTransform,
    active_nodes: Option<&HashSet<String>>,
) -> std::io::Result<Vec<TraceEvent>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(input);
    let mut events = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(err) => match err.into_kind() {
                csv::ErrorKind::Io(source) => return Err(source),
                kind => {
                    debug!("Skipping unreadable trace record: {:?}", kind);
                    continue;
                }
            },
        };
        if record.get(0).map_or(false, |field| field.starts_with("//")) {
            continue;
        }
        match parse_record(&record, scope, transform) {
            Some(event) => {
                if let Some(nodes) = active_nodes {
                    if !nodes.contains(&event.node_id) {
                        continue;
                    }
                }
                events.push(event);
            }
            None => debug!("Skipping malformed trace record: {:?}", record),
        }
    }
    Ok(events)
}

fn parse_record(record: &StringRecord, scope: TraceScope, transform: TimeTransform) -> Option<TraceEvent> {
    let node_id = record.get(0).filter(|s| !s.is_empty())?;
    let micros = record.get(1)?.parse::<i64>().ok()?;
    let code = record.get(2)?.parse::<i64>().ok()?;
    Some(TraceEvent {
        timestamp: transform.apply(micros),
        node_id: node_id.to_string(),
        kind: scope.event_kind(code)?,
    })
}
