//! Facade assembling datacenter, recovery policy and failure sources into a runnable simulation.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use sugars::{rc, refcell};

use dslab_core::component::Id;
use dslab_core::context::SimulationContext;
use dslab_core::simulation::Simulation;
use dslab_core::{log_info, log_warn};

use crate::core::config::{PolicyKind, PredictorConfig, SimulationConfig};
use crate::core::datacenter::Datacenter;
use crate::core::events::failure::DeploymentCompleted;
use crate::core::events::workload::{TransmissionSubmitted, UnitSubmitted};
use crate::core::fabric::{Fabric, VmStatus};
use crate::core::injector::VmFailureInjector;
use crate::core::metrics::{FailureMetrics, FailureReport};
use crate::core::placement::PlacementTable;
use crate::core::provisioner::{BackupProvisioner, CommandSolver, PlacementSolver};
use crate::core::recovery_policy::build_policy;
use crate::core::trace::{parse_trace, TimeTransform, TraceEvent, TraceScope};
use crate::error::Result;
use crate::extensions::failure_predictor::{CommandPredictor, FailurePredictor, HostPredictor};
use crate::extensions::workload_reader::{CsvWorkloadReader, WorkloadRequest, WorkloadSource};

/// Inputs of a run: VM placements, failure traces and workload.
#[derive(Clone, Debug, Default)]
pub struct SimulationInputs {
    pub placements: PlacementTable,
    pub host_events: Vec<TraceEvent>,
    pub vm_events: Vec<TraceEvent>,
    pub workload: Vec<WorkloadRequest>,
}

impl SimulationInputs {
    /// Reads inputs from the files named in config. Absent files yield empty inputs.
    pub fn load(config: &SimulationConfig) -> Result<Self> {
        let placements = match &config.placements {
            Some(path) => PlacementTable::load(path)?,
            None => PlacementTable::new(),
        };
        let transform = TimeTransform {
            offset: config.trace_time_offset,
            compression: config.trace_compression,
        };
        let used_hosts = placements.used_hosts();
        let host_filter = if config.filter_host_trace && !placements.is_empty() {
            Some(&used_hosts)
        } else {
            None
        };
        let host_events = match &config.host_trace {
            Some(path) => parse_trace(path, TraceScope::Host, transform, host_filter)?,
            None => Vec::new(),
        };
        let vm_events = match &config.vm_trace {
            Some(path) => parse_trace(path, TraceScope::Vm, transform, None)?,
            None => Vec::new(),
        };
        let workload = match &config.workload {
            Some(path) => {
                let mut reader = CsvWorkloadReader::load(path)?;
                let mut requests = Vec::with_capacity(reader.len());
                while let Some(request) = reader.next_request() {
                    requests.push(request);
                }
                requests
            }
            None => Vec::new(),
        };
        Ok(Self {
            placements,
            host_events,
            vm_events,
            workload,
        })
    }
}

/// Datacenter availability simulation.
///
/// Deploys VMs according to the placement table, replays host and VM failure traces against them
/// and lets the configured recovery policy react.
pub struct AvailabilitySimulation {
    fabric: Rc<RefCell<Fabric>>,
    datacenter: Rc<RefCell<Datacenter>>,
    datacenter_id: Id,
    provisioner: Rc<RefCell<BackupProvisioner>>,
    injector: Rc<RefCell<VmFailureInjector>>,
    injector_id: Id,
    predictor: Option<Arc<dyn HostPredictor>>,
    predictor_component: Option<Rc<RefCell<FailurePredictor>>>,
    workload: Vec<WorkloadRequest>,
    started: bool,
    sim: Simulation,
    ctx: SimulationContext,
    sim_config: Rc<SimulationConfig>,
}

impl AvailabilitySimulation {
    /// Creates simulation reading its inputs from the files named in config.
    pub fn new(sim: Simulation, sim_config: SimulationConfig) -> Result<Self> {
        let inputs = SimulationInputs::load(&sim_config)?;
        Ok(Self::with_inputs(sim, sim_config, inputs))
    }

    /// Creates simulation from in-memory inputs.
    ///
    /// If no hosts are configured, a host is created for every host named in the placement table.
    pub fn with_inputs(mut sim: Simulation, sim_config: SimulationConfig, inputs: SimulationInputs) -> Self {
        let ctx = sim.create_context("simulation");
        let fabric = rc!(refcell!(Fabric::new()));
        {
            let mut fabric = fabric.borrow_mut();
            for host in sim_config.hosts.iter() {
                for (name, cpus, memory) in host.expand() {
                    fabric.add_host(&name, cpus, memory);
                }
            }
            if sim_config.hosts.is_empty() {
                for (_, host_name) in inputs.placements.iter() {
                    fabric.add_host(host_name, 0, 0);
                }
            }
            for (vm_name, host_name) in inputs.placements.iter() {
                let vm_id = fabric.add_vm(vm_name, sim_config.vm_mips, sim_config.vm_pes);
                let allocated = match fabric.host_id(host_name) {
                    Some(host_id) => fabric.allocate(vm_id, host_id),
                    None => false,
                };
                if !allocated {
                    log_warn!(ctx, "Host {} of VM {} not found, VM is not deployed", host_name, vm_name);
                }
            }
        }

        let datacenter_ctx = sim.create_context("datacenter");
        let provisioner_ctx = sim.create_context("backup_provisioner");
        let injector_ctx = sim.create_context("vm_failure_injector");
        let datacenter_id = datacenter_ctx.id();

        let policy = build_policy(
            sim_config.policy,
            &inputs.placements,
            &fabric.borrow(),
            sim_config.vm_recovery_delay,
        );
        let solver = sim_config
            .backup_solver
            .clone()
            .map(|command| Arc::new(CommandSolver::new(command)) as Arc<dyn PlacementSolver>);
        let provisioner = rc!(refcell!(BackupProvisioner::new(
            solver,
            datacenter_id,
            sim_config.solver_poll_interval,
            sim_config.solver_threads,
            provisioner_ctx,
        )));
        let provisioner_id = sim.add_handler("backup_provisioner", provisioner.clone());

        let datacenter = rc!(refcell!(Datacenter::new(
            policy,
            fabric.clone(),
            inputs.host_events,
            provisioner_id,
            datacenter_ctx,
        )));
        sim.add_handler("datacenter", datacenter.clone());

        let injector = rc!(refcell!(VmFailureInjector::new(
            inputs.vm_events,
            fabric.clone(),
            datacenter_id,
            injector_ctx,
        )));
        let injector_id = sim.add_handler("vm_failure_injector", injector.clone());

        let predictor = sim_config
            .predictor
            .as_ref()
            .map(|config| Arc::new(CommandPredictor::new(config.command.clone())) as Arc<dyn HostPredictor>);

        Self {
            fabric,
            datacenter,
            datacenter_id,
            provisioner,
            injector,
            injector_id,
            predictor,
            predictor_component: None,
            workload: inputs.workload,
            started: false,
            sim,
            ctx,
            sim_config: rc!(sim_config),
        }
    }

    /// Replaces the backup placement solver.
    pub fn set_backup_solver(&mut self, solver: Arc<dyn PlacementSolver>) {
        self.provisioner.borrow_mut().set_solver(solver);
    }

    /// Enables host failure prediction with the given predictor.
    pub fn set_host_predictor(&mut self, predictor: Arc<dyn HostPredictor>) {
        self.predictor = Some(predictor);
    }

    /// Schedules trace events, workload and prediction. Called automatically by the stepping methods.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        log_info!(
            self.ctx,
            "Starting {} simulation with {} VMs on {} hosts",
            self.sim_config.policy,
            self.fabric.borrow().vms().count(),
            self.fabric.borrow().hosts().count()
        );

        self.datacenter.borrow_mut().start();
        self.ctx.emit_now(DeploymentCompleted {}, self.injector_id);
        self.submit_workload();

        if let Some(predictor) = self.predictor.clone() {
            let config = self.sim_config.predictor.clone().unwrap_or(PredictorConfig {
                command: Vec::new(),
                batch_size: 100,
                prediction_interval: 10.,
                batch_interval: 0.5,
            });
            let component = rc!(refcell!(FailurePredictor::new(
                predictor,
                self.fabric.clone(),
                self.datacenter_id,
                config,
                self.sim_config.solver_poll_interval,
                self.sim.create_context("failure_predictor"),
            )));
            self.sim.add_handler("failure_predictor", component.clone());
            component.borrow_mut().start();
            self.predictor_component = Some(component);
        }
    }

    fn submit_workload(&mut self) {
        let workload = std::mem::take(&mut self.workload);
        let fabric = self.fabric.borrow();
        for request in workload {
            if !is_valid_delay(request.time()) {
                log_warn!(self.ctx, "Workload request at invalid time {}, skipping", request.time());
                continue;
            }
            match request {
                WorkloadRequest::Process { time, vm, length } => match fabric.vm_id(&vm) {
                    Some(vm_id) => {
                        self.ctx.emit(UnitSubmitted { vm_id, length }, self.datacenter_id, time);
                    }
                    None => log_warn!(self.ctx, "Workload VM {} not found, skipping", vm),
                },
                WorkloadRequest::Transmit {
                    time,
                    src,
                    dst,
                    size,
                    bandwidth,
                } => match (fabric.vm_id(&src), fabric.vm_id(&dst)) {
                    (Some(src_vm), Some(dst_vm)) => {
                        self.ctx.emit(
                            TransmissionSubmitted {
                                src_vm,
                                dst_vm,
                                size,
                                bandwidth,
                            },
                            self.datacenter_id,
                            time,
                        );
                    }
                    _ => log_warn!(self.ctx, "Transmission {} -> {} has unknown VMs, skipping", src, dst),
                },
            }
        }
    }

    /// Submits a unit of work of given length to the VM after the delay.
    ///
    /// Returns `false` if the VM is unknown or the delay is negative or not finite.
    pub fn submit_unit(&mut self, vm_name: &str, length: f64, delay: f64) -> bool {
        if !is_valid_delay(delay) {
            return false;
        }
        match self.fabric.borrow().vm_id(vm_name) {
            Some(vm_id) => {
                self.ctx.emit(UnitSubmitted { vm_id, length }, self.datacenter_id, delay);
                true
            }
            None => false,
        }
    }

    /// Performs the specified number of steps through the simulation.
    pub fn steps(&mut self, step_count: u64) -> bool {
        self.start();
        self.sim.steps(step_count)
    }

    /// Steps through the simulation until there are no pending events left.
    pub fn step_until_no_events(&mut self) {
        self.start();
        self.sim.step_until_no_events();
    }

    /// Steps through the simulation with duration limit.
    pub fn step_for_duration(&mut self, duration: f64) {
        self.start();
        self.sim.step_for_duration(duration);
    }

    /// Runs the simulation until the configured horizon and returns the final metrics.
    pub fn run(&mut self) -> FailureReport {
        self.start();
        let remaining = self.sim_config.simulation_length - self.sim.time();
        if remaining > 0. {
            self.sim.step_for_duration(remaining);
        }
        self.finalize()
    }

    /// Returns the final metrics over the configured horizon.
    pub fn finalize(&self) -> FailureReport {
        let report = self.metrics().report(self.sim_config.simulation_length);
        log_info!(self.ctx, "Finished with availability {:.3}%", report.availability);
        report
    }

    pub fn current_time(&self) -> f64 {
        self.sim.time()
    }

    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    pub fn policy(&self) -> PolicyKind {
        self.sim_config.policy
    }

    pub fn fabric(&self) -> Rc<RefCell<Fabric>> {
        self.fabric.clone()
    }

    pub fn metrics(&self) -> FailureMetrics {
        self.datacenter.borrow().metrics().clone()
    }

    pub fn vm_status(&self, vm_name: &str) -> Option<VmStatus> {
        self.fabric.borrow().vm_by_name(vm_name).map(|vm| vm.status)
    }

    pub fn vm_downtime(&self, vm_name: &str) -> Option<f64> {
        self.datacenter.borrow().policy().vm_downtime(vm_name)
    }

    pub fn backup_pool(&self, primary: &str) -> Option<Vec<String>> {
        self.datacenter.borrow().policy().backup_pool(primary)
    }

    pub fn active_backup(&self, failed_vm: &str) -> Option<String> {
        self.datacenter.borrow().policy().active_backup(failed_vm)
    }

    /// Number of VM failures scheduled from the VM trace.
    pub fn scheduled_vm_failures(&self) -> usize {
        self.injector.borrow().scheduled()
    }

    /// Number of backup requests waiting for the solver.
    pub fn pending_backup_requests(&self) -> usize {
        self.provisioner.borrow().pending()
    }

    /// Last prediction made for the host, if prediction is enabled.
    pub fn host_prediction(&self, host_name: &str) -> Option<bool> {
        let host_id = self.fabric.borrow().host_id(host_name)?;
        self.predictor_component
            .as_ref()
            .and_then(|predictor| predictor.borrow().prediction(host_id))
    }
}

fn is_valid_delay(delay: f64) -> bool {
    delay.is_finite() && delay >= 0.
}
