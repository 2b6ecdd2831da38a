//! Provisioning of replacement backups through an external placement solver.

use std::process::Command;
use std::sync::Arc;

use dslab_core::cast;
use dslab_core::component::Id;
use dslab_core::context::SimulationContext;
use dslab_core::event::Event;
use dslab_core::handler::EventHandler;
use dslab_core::{log_debug, log_error, log_info};

use crate::core::events::backup::{
    BackupPlacementFailed, BackupPlacementRequest, BackupPlacementSucceeded, PollSolverReplies,
};
use crate::core::external::ExternalWorker;
use crate::error::SolverError;

/// Placement of a new backup VM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupPlacement {
    pub backup_name: String,
    pub host_name: String,
}

/// Decides where a new backup of the primary VM should run.
///
/// Called from a worker thread, so long-running implementations do not stall the simulation.
pub trait PlacementSolver: Send + Sync {
    fn place_backup(&self, primary: &str) -> Result<BackupPlacement, SolverError>;
}

impl<F> PlacementSolver for F
where
    F: Fn(&str) -> Result<BackupPlacement, SolverError> + Send + Sync,
{
    fn place_backup(&self, primary: &str) -> Result<BackupPlacement, SolverError> {
        self(primary)
    }
}

/// Solver running an external program.
///
/// The program is invoked with the configured arguments followed by the primary name and must print
/// exactly one line `<backup name>,<host name>`.
pub struct CommandSolver {
    command: Vec<String>,
}

impl CommandSolver {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }
}

impl PlacementSolver for CommandSolver {
    fn place_backup(&self, primary: &str) -> Result<BackupPlacement, SolverError> {
        let (program, args) = self.command.split_first().ok_or(SolverError::NoCommand)?;
        let output = Command::new(program)
            .args(args)
            .arg(primary)
            .output()
            .map_err(SolverError::Spawn)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SolverError::ExitStatus {
                status: output.status.to_string(),
                output: format!("{}{}", stdout, stderr).trim().to_string(),
            });
        }
        parse_solver_output(&stdout)
    }
}

/// Parses `<backup name>,<host name>` solver reply.
pub fn parse_solver_output(output: &str) -> Result<BackupPlacement, SolverError> {
    let lines: Vec<&str> = output.lines().map(str::trim).filter(|line| !line.is_empty()).collect();
    let line = match lines.as_slice() {
        [] => return Err(SolverError::EmptyOutput),
        [line] => *line,
        _ => return Err(SolverError::MalformedOutput(output.trim().to_string())),
    };
    match line.split(',').map(str::trim).collect::<Vec<_>>().as_slice() {
        [backup, host] if !backup.is_empty() && !host.is_empty() => Ok(BackupPlacement {
            backup_name: backup.to_string(),
            host_name: host.to_string(),
        }),
        _ => Err(SolverError::MalformedOutput(line.to_string())),
    }
}

/// Component serving backup placement requests of the datacenter.
///
/// Requests are solved on worker threads. While any of them is outstanding, the component polls for
/// replies every `poll_interval` of simulated time and forwards each reply to the datacenter.
pub struct BackupProvisioner {
    solver: Option<Arc<dyn PlacementSolver>>,
    worker: ExternalWorker<(String, Result<BackupPlacement, SolverError>)>,
    datacenter_id: Id,
    poll_interval: f64,
    polling: bool,
    ctx: SimulationContext,
}

impl BackupProvisioner {
    pub fn new(
        solver: Option<Arc<dyn PlacementSolver>>,
        datacenter_id: Id,
        poll_interval: f64,
        num_threads: usize,
        ctx: SimulationContext,
    ) -> Self {
        Self {
            solver,
            worker: ExternalWorker::new("backup-solver", num_threads),
            datacenter_id,
            poll_interval,
            polling: false,
            ctx,
        }
    }

    pub fn set_solver(&mut self, solver: Arc<dyn PlacementSolver>) {
        self.solver = Some(solver);
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    /// Number of requests waiting for the solver.
    pub fn pending(&self) -> usize {
        self.worker.pending()
    }

    fn on_request(&mut self, primary: String) {
        let solver = match &self.solver {
            Some(solver) => solver.clone(),
            None => {
                self.reply_failure(primary, "no backup solver configured".to_string());
                return;
            }
        };
        log_debug!(self.ctx, "Solving placement of new backup for {}", primary);
        self.worker.submit(move || {
            let result = solver.place_backup(&primary);
            (primary, result)
        });
        if !self.polling {
            self.polling = true;
            self.ctx.emit_self(PollSolverReplies {}, self.poll_interval);
        }
    }

    fn on_poll(&mut self) {
        for (_, reply) in self.worker.try_collect() {
            match reply {
                Some((primary, Ok(placement))) => {
                    log_info!(
                        self.ctx,
                        "Solver placed {} on {} for {}",
                        placement.backup_name,
                        placement.host_name,
                        primary
                    );
                    self.ctx.emit_now(
                        BackupPlacementSucceeded {
                            primary,
                            backup_name: placement.backup_name,
                            host_name: placement.host_name,
                        },
                        self.datacenter_id,
                    );
                }
                Some((primary, Err(err))) => self.reply_failure(primary, err.to_string()),
                None => log_error!(self.ctx, "Backup solver crashed"),
            }
        }
        if self.worker.pending() > 0 {
            self.ctx.emit_self(PollSolverReplies {}, self.poll_interval);
        } else {
            self.polling = false;
        }
    }

    fn reply_failure(&self, primary: String, reason: String) {
        log_error!(self.ctx, "Backup placement for {} failed: {}", primary, reason);
        self.ctx
            .emit_now(BackupPlacementFailed { primary, reason }, self.datacenter_id);
    }
}

impl EventHandler for BackupProvisioner {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            BackupPlacementRequest { primary } => {
                self.on_request(primary);
            }
            PollSolverReplies {} => {
                self.on_poll();
            }
        })
    }
}
