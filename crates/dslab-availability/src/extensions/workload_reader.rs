//! Reader of CSV workload files.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{info, warn};
use serde::Deserialize;

use crate::error::Error;

/// Single request from the workload file.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkloadRequest {
    /// Unit of work of given length in MI addressed to a VM.
    Process { time: f64, vm: String, length: f64 },
    /// Data transfer of given size in bytes between VMs over a link with given bandwidth in bit/s.
    Transmit {
        time: f64,
        src: String,
        dst: String,
        size: f64,
        bandwidth: f64,
    },
}

impl WorkloadRequest {
    pub fn time(&self) -> f64 {
        match self {
            WorkloadRequest::Process { time, .. } => *time,
            WorkloadRequest::Transmit { time, .. } => *time,
        }
    }
}

/// Source of workload requests.
pub trait WorkloadSource {
    /// Returns the next request (if any).
    ///
    /// Requests should be returned in non-decreasing order of their times.
    fn next_request(&mut self) -> Option<WorkloadRequest>;
}

#[derive(Deserialize, Debug)]
struct WorkloadRecord {
    time: f64,
    kind: String,
    source: String,
    target: Option<String>,
    amount: f64,
    bandwidth: Option<f64>,
}

/// Reads requests from CSV file with header `time,kind,source,target,amount,bandwidth`.
///
/// `kind` is either `process` (target and bandwidth are empty, amount is the unit length)
/// or `transmit` (amount is the transfer size).
pub struct CsvWorkloadReader {
    requests: Vec<WorkloadRequest>,
    current: usize,
}

impl CsvWorkloadReader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| Error::Workload {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        let reader = Self::from_reader(file).map_err(|source| Error::Workload {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Read {} workload requests from {}", reader.requests.len(), path.display());
        Ok(reader)
    }

    pub fn from_reader<R: Read>(input: R) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
        let mut requests = Vec::new();
        for record in reader.deserialize() {
            let record: WorkloadRecord = match record {
                Ok(record) => record,
                Err(err) if err.is_io_error() => return Err(err),
                Err(err) => {
                    warn!("Skipping malformed workload row: {}", err);
                    continue;
                }
            };
            if !record.time.is_finite() || record.time < 0. {
                warn!("Skipping workload record at invalid time {} from {}", record.time, record.source);
                continue;
            }
            match (record.kind.as_str(), record.target) {
                ("process", _) => requests.push(WorkloadRequest::Process {
                    time: record.time,
                    vm: record.source,
                    length: record.amount,
                }),
                ("transmit", Some(target)) => requests.push(WorkloadRequest::Transmit {
                    time: record.time,
                    src: record.source,
                    dst: target,
                    size: record.amount,
                    bandwidth: record.bandwidth.unwrap_or(0.),
                }),
                (kind, _) => warn!("Skipping workload record of kind {} from {}", kind, record.source),
            }
        }
        requests.sort_by(|a, b| a.time().total_cmp(&b.time()));
        Ok(Self { requests, current: 0 })
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl WorkloadSource for CsvWorkloadReader {
    fn next_request(&mut self) -> Option<WorkloadRequest> {
        let request = self.requests.get(self.current)?.clone();
        self.current += 1;
        Some(request)
    }
}
