//! Periodic host failure prediction through an external predictor.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::process::Command;
use std::rc::Rc;
use std::sync::Arc;

use serde::Serialize;

use dslab_core::cast;
use dslab_core::component::Id;
use dslab_core::context::SimulationContext;
use dslab_core::event::Event;
use dslab_core::handler::EventHandler;
use dslab_core::{log_debug, log_error, log_info};

use crate::core::config::PredictorConfig;
use crate::core::events::prediction::{FailurePredicted, PollPredictions, PredictBatch};
use crate::core::external::ExternalWorker;
use crate::core::fabric::{Fabric, HostId, HostRecord};
use crate::error::PredictorError;

/// Features of a host passed to the predictor.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostFeatures {
    pub host_id: HostId,
    pub cpus: u32,
    pub memory: u64,
    /// First character of the host name.
    pub platform_id: String,
    /// Host name.
    pub cluster: String,
    /// Prediction time, with two decimals.
    pub time: String,
}

impl HostFeatures {
    pub fn new(host: &HostRecord, time: f64) -> Self {
        Self {
            host_id: host.id,
            cpus: host.cpus,
            memory: host.memory,
            platform_id: host.name.chars().next().map(String::from).unwrap_or_default(),
            cluster: host.name.clone(),
            time: format!("{:.2}", time),
        }
    }
}

/// Predicts which of the hosts are going to fail.
///
/// Called from a worker thread. Hosts missing from the result are treated as not failing.
pub trait HostPredictor: Send + Sync {
    fn predict(&self, hosts: &[HostFeatures]) -> Result<Vec<(HostId, bool)>, PredictorError>;
}

/// Predictor running an external program.
///
/// Host features are written to a temporary CSV file with header
/// `host_id,cpus,memory,platform_id,cluster,time` whose path is appended to the command.
/// The program must print `<host id>,<0 or 1>` lines, lines without a numeric host id are ignored.
pub struct CommandPredictor {
    command: Vec<String>,
}

impl CommandPredictor {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl HostPredictor for CommandPredictor {
    fn predict(&self, hosts: &[HostFeatures]) -> Result<Vec<(HostId, bool)>, PredictorError> {
        let (program, args) = self.command.split_first().ok_or(PredictorError::NoCommand)?;
        let mut file = tempfile::Builder::new()
            .prefix("batch_hosts_")
            .suffix(".csv")
            .tempfile()
            .map_err(PredictorError::Features)?;
        {
            let mut writer = csv::Writer::from_writer(file.as_file_mut());
            for host in hosts {
                writer
                    .serialize(host)
                    .map_err(|err| PredictorError::Features(err.into()))?;
            }
            writer.flush().map_err(PredictorError::Features)?;
        }
        file.as_file_mut().flush().map_err(PredictorError::Features)?;

        let output = Command::new(program)
            .args(args)
            .arg(file.path())
            .output()
            .map_err(PredictorError::Spawn)?;
        if !output.status.success() {
            return Err(PredictorError::ExitStatus(output.status.to_string()));
        }
        parse_predictions(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parses `<host id>,<prediction>` lines. A non-zero prediction means the host is expected to fail.
pub fn parse_predictions(output: &str) -> Result<Vec<(HostId, bool)>, PredictorError> {
    let mut predictions = Vec::new();
    for line in output.lines().map(str::trim) {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() != 2 {
            continue;
        }
        let host_id: HostId = match parts[0].parse() {
            Ok(id) => id,
            Err(_) => continue,
        };
        let prediction: i64 = parts[1]
            .parse()
            .map_err(|_| PredictorError::MalformedOutput(line.to_string()))?;
        predictions.push((host_id, prediction != 0));
    }
    Ok(predictions)
}

type BatchResult = (Vec<HostId>, Result<Vec<(HostId, bool)>, PredictorError>);

/// Component asking the predictor about hosts in batches and notifying the datacenter
/// when a host is newly predicted to fail.
///
/// Failed hosts are not predicted. A full pass over all hosts is repeated every `prediction_interval`,
/// batches of one pass are spread `batch_interval` apart.
pub struct FailurePredictor {
    predictor: Arc<dyn HostPredictor>,
    worker: ExternalWorker<BatchResult>,
    fabric: Rc<RefCell<Fabric>>,
    host_ids: Vec<HostId>,
    next_host: usize,
    last_predictions: HashMap<HostId, bool>,
    datacenter_id: Id,
    config: PredictorConfig,
    poll_interval: f64,
    polling: bool,
    ctx: SimulationContext,
}

impl FailurePredictor {
    pub fn new(
        predictor: Arc<dyn HostPredictor>,
        fabric: Rc<RefCell<Fabric>>,
        datacenter_id: Id,
        config: PredictorConfig,
        poll_interval: f64,
        ctx: SimulationContext,
    ) -> Self {
        let host_ids = fabric.borrow().hosts().map(|host| host.id).collect();
        Self {
            predictor,
            worker: ExternalWorker::new("failure-predictor", 1),
            fabric,
            host_ids,
            next_host: 0,
            last_predictions: HashMap::new(),
            datacenter_id,
            config,
            poll_interval,
            polling: false,
            ctx,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    /// Schedules the first pass over hosts.
    pub fn start(&mut self) {
        if self.host_ids.is_empty() {
            return;
        }
        log_info!(
            self.ctx,
            "Predicting failures of {} hosts every {}",
            self.host_ids.len(),
            self.config.prediction_interval
        );
        self.ctx.emit_self(PredictBatch {}, self.config.prediction_interval);
    }

    /// Last prediction made for the host.
    pub fn prediction(&self, host_id: HostId) -> Option<bool> {
        self.last_predictions.get(&host_id).copied()
    }

    fn predict_batch(&mut self) {
        let batch_size = self.config.batch_size.max(1);
        let end = (self.next_host + batch_size).min(self.host_ids.len());
        let now = self.ctx.time();
        let fabric = self.fabric.borrow();
        let features: Vec<HostFeatures> = self.host_ids[self.next_host..end]
            .iter()
            .filter_map(|id| fabric.host(*id))
            .filter(|host| !host.failed)
            .map(|host| HostFeatures::new(host, now))
            .collect();
        drop(fabric);

        if !features.is_empty() {
            log_debug!(self.ctx, "Predicting batch of {} hosts", features.len());
            let predictor = self.predictor.clone();
            let batch: Vec<HostId> = features.iter().map(|host| host.host_id).collect();
            self.worker.submit(move || (batch, predictor.predict(&features)));
            if !self.polling {
                self.polling = true;
                self.ctx.emit_self(PollPredictions {}, self.poll_interval);
            }
        }

        if end >= self.host_ids.len() {
            self.next_host = 0;
            log_debug!(self.ctx, "Completed full check cycle");
            self.ctx.emit_self(PredictBatch {}, self.config.prediction_interval);
        } else {
            self.next_host = end;
            self.ctx.emit_self(PredictBatch {}, self.config.batch_interval);
        }
    }

    fn on_poll(&mut self) {
        for (_, result) in self.worker.try_collect() {
            let (batch, predictions) = match result {
                Some((batch, Ok(predictions))) => (batch, predictions),
                Some((batch, Err(err))) => {
                    log_error!(self.ctx, "Error getting batch predictions: {}", err);
                    let predictions = batch.iter().map(|id| (*id, false)).collect();
                    (batch, predictions)
                }
                None => {
                    log_error!(self.ctx, "Failure predictor crashed");
                    continue;
                }
            };
            for (host_id, will_fail) in predictions {
                if !batch.contains(&host_id) {
                    continue;
                }
                let previous = self.last_predictions.insert(host_id, will_fail).unwrap_or(false);
                if will_fail && !previous {
                    log_info!(self.ctx, "Host {} is predicted to fail", host_id);
                    self.ctx.emit_now(FailurePredicted { host_id }, self.datacenter_id);
                }
            }
        }
        if self.worker.pending() > 0 {
            self.ctx.emit_self(PollPredictions {}, self.poll_interval);
        } else {
            self.polling = false;
        }
    }
}

impl EventHandler for FailurePredictor {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            PredictBatch {} => {
                self.predict_batch();
            }
            PollPredictions {} => {
                self.on_poll();
            }
        })
    }
}
