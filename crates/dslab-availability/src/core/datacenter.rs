//! Datacenter component driving the recovery policy.

use std::cell::RefCell;
use std::rc::Rc;

use dslab_core::cast;
use dslab_core::component::Id;
use dslab_core::context::SimulationContext;
use dslab_core::event::{Event, EventData};
use dslab_core::handler::EventHandler;
use dslab_core::{log_debug, log_error, log_info, log_warn};

use crate::core::events::backup::{BackupPlacementFailed, BackupPlacementRequest, BackupPlacementSucceeded};
use crate::core::events::failure::{HostFailure, HostRecovery, VmFailure, VmRestore};
use crate::core::events::prediction::FailurePredicted;
use crate::core::events::workload::{TransmissionSubmitted, UnitFinished, UnitSubmitted};
use crate::core::fabric::{Fabric, HostId, VmId, VmStatus, WorkloadUnit};
use crate::core::metrics::FailureMetrics;
use crate::core::recovery_policy::RecoveryPolicy;
use crate::core::trace::{TraceEvent, TraceEventKind};

/// State shared between the datacenter and its recovery policy.
///
/// Provides the operations common to all policies: marking hosts and VMs failed,
/// running units on VMs and talking to the backup provisioner.
pub struct PolicyContext {
    pub fabric: Rc<RefCell<Fabric>>,
    pub metrics: FailureMetrics,
    provisioner_id: Id,
    next_attempt: u64,
    ctx: SimulationContext,
}

impl PolicyContext {
    pub fn new(fabric: Rc<RefCell<Fabric>>, provisioner_id: Id, ctx: SimulationContext) -> Self {
        Self {
            fabric,
            metrics: FailureMetrics::new(),
            provisioner_id,
            next_attempt: 0,
            ctx,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn time(&self) -> f64 {
        self.ctx.time()
    }

    /// Marks host failed and counts the failure. Returns `false` for unknown hosts.
    pub fn fail_host(&mut self, host_id: HostId) -> bool {
        match self.fabric.borrow_mut().host_mut(host_id) {
            Some(host) => host.failed = true,
            None => return false,
        }
        self.metrics.total_failures += 1;
        true
    }

    /// Clears host failure flag. Returns `false` if the host is unknown or not failed.
    pub fn recover_host(&mut self, host_id: HostId) -> bool {
        match self.fabric.borrow_mut().host_mut(host_id) {
            Some(host) if host.failed => {
                host.failed = false;
                true
            }
            _ => false,
        }
    }

    pub fn host_name(&self, host_id: HostId) -> String {
        self.fabric
            .borrow()
            .host(host_id)
            .map_or_else(|| format!("host#{}", host_id), |host| host.name.clone())
    }

    pub fn vm_name(&self, vm_id: VmId) -> String {
        self.fabric
            .borrow()
            .vm(vm_id)
            .map_or_else(|| format!("vm#{}", vm_id), |vm| vm.name.clone())
    }

    /// VMs currently allocated on the host.
    pub fn resident_vms(&self, host_id: HostId) -> Vec<VmId> {
        self.fabric.borrow().host(host_id).map(|host| host.vms()).unwrap_or_default()
    }

    /// Emits event to the datacenter itself.
    pub fn emit_self<T: EventData>(&self, data: T, delay: f64) {
        self.ctx.emit_self(data, delay);
    }

    /// Schedules immediate destruction of the VM.
    pub fn destroy_vm(&mut self, vm_id: VmId) {
        self.ctx.emit_self_now(VmFailure { vm_id });
    }

    /// Marks VM failed. Returns `false` if the VM is unknown or has already failed.
    pub fn begin_vm_failure(&mut self, vm_id: VmId) -> bool {
        let status = self.fabric.borrow().vm(vm_id).map(|vm| vm.status);
        match status {
            None => {
                log_warn!(self, "Ignoring destruction of unknown VM {}", vm_id);
                false
            }
            Some(VmStatus::Failed) => {
                log_warn!(
                    self,
                    "VM {} is already failed, ignoring duplicate destruction",
                    self.vm_name(vm_id)
                );
                false
            }
            Some(_) => {
                if let Some(vm) = self.fabric.borrow_mut().vm_mut(vm_id) {
                    vm.status = VmStatus::Failed;
                }
                true
            }
        }
    }

    pub fn is_vm_serving(&self, vm_id: VmId) -> bool {
        self.fabric.borrow().is_vm_serving(vm_id)
    }

    /// Nominal processing time of the unit on its VM.
    pub fn processing_time(&self, unit: &WorkloadUnit) -> f64 {
        self.fabric
            .borrow()
            .vm(unit.vm)
            .map_or(0., |vm| vm.processing_time(unit))
    }

    /// Accounts the time the unit has been waiting since its submission as processing delay.
    pub fn add_waiting_delay(&mut self, unit: &WorkloadUnit) {
        self.metrics.total_processing_delay += self.time() - unit.submission_time;
    }

    /// Queues the unit on its VM and starts it if the VM is idle.
    pub fn run_unit(&mut self, unit: WorkloadUnit) {
        let vm_id = unit.vm;
        let idle = match self.fabric.borrow_mut().vm_mut(vm_id) {
            Some(vm) => vm.enqueue(unit),
            None => false,
        };
        if idle {
            self.start_next_unit(vm_id);
        }
    }

    /// Completes the unit started under the given attempt. Stale completions are ignored.
    pub fn finish_unit(&mut self, vm_id: VmId, attempt: u64) {
        let finished = self.fabric.borrow_mut().vm_mut(vm_id).and_then(|vm| vm.finish(attempt));
        if let Some(unit) = finished {
            self.metrics.completed_units += 1;
            log_debug!(self, "Unit {} finished on VM {}", unit.id, self.vm_name(vm_id));
            self.start_next_unit(vm_id);
        }
    }

    fn start_next_unit(&mut self, vm_id: VmId) {
        if !self.is_vm_serving(vm_id) {
            return;
        }
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        let duration = self.fabric.borrow_mut().vm_mut(vm_id).and_then(|vm| vm.start_next(attempt));
        if let Some(duration) = duration {
            self.ctx.emit_self(UnitFinished { vm_id, attempt }, duration);
        }
    }

    /// Asks the provisioner for a new backup of the primary.
    pub fn request_backup(&mut self, primary: &str) {
        log_debug!(self, "Requesting new backup for {}", primary);
        self.ctx.emit_now(
            BackupPlacementRequest {
                primary: primary.to_string(),
            },
            self.provisioner_id,
        );
    }
}

/// Datacenter receiving failure, recovery, workload and provisioning events and passing them to the policy.
pub struct Datacenter {
    policy: Box<dyn RecoveryPolicy>,
    state: PolicyContext,
    host_events: Vec<TraceEvent>,
}

impl Datacenter {
    pub fn new(
        policy: Box<dyn RecoveryPolicy>,
        fabric: Rc<RefCell<Fabric>>,
        host_events: Vec<TraceEvent>,
        provisioner_id: Id,
        ctx: SimulationContext,
    ) -> Self {
        Self {
            policy,
            state: PolicyContext::new(fabric, provisioner_id, ctx),
            host_events,
        }
    }

    pub fn id(&self) -> Id {
        self.state.id()
    }

    pub fn policy(&self) -> &dyn RecoveryPolicy {
        self.policy.as_ref()
    }

    pub fn metrics(&self) -> &FailureMetrics {
        &self.state.metrics
    }

    /// Schedules host failures and recoveries from the trace relative to the current time.
    pub fn start(&mut self) -> usize {
        let events = std::mem::take(&mut self.host_events);
        let mut scheduled = 0;
        for event in events {
            let host_id = match self.state.fabric.borrow().host_id(&event.node_id) {
                Some(id) => id,
                None => {
                    log_warn!(self.state, "Host {} from trace not found, skipping", event.node_id);
                    continue;
                }
            };
            if event.timestamp < 0. {
                log_warn!(
                    self.state,
                    "Skipping {:?} of host {} at negative time {}",
                    event.kind,
                    event.node_id,
                    event.timestamp
                );
                continue;
            }
            match event.kind {
                TraceEventKind::Failure => self.state.ctx.emit_self(HostFailure { host_id }, event.timestamp),
                TraceEventKind::Recovery => self.state.ctx.emit_self(HostRecovery { host_id }, event.timestamp),
            };
            scheduled += 1;
        }
        log_info!(self.state, "Scheduled {} host trace events", scheduled);
        scheduled
    }

    fn on_unit_submitted(&mut self, vm_id: VmId, length: f64) {
        if self.state.fabric.borrow().vm(vm_id).is_none() {
            log_warn!(self.state, "Unit addressed to unknown VM {}, dropping", vm_id);
            return;
        }
        let id = self.state.fabric.borrow_mut().next_unit_id();
        let unit = WorkloadUnit {
            id,
            vm: vm_id,
            length,
            submission_time: self.state.time(),
        };
        self.policy.on_workload_dispatch(unit, &mut self.state);
    }
}

impl EventHandler for Datacenter {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            HostFailure { host_id } => {
                log_info!(self.state, "Host {} failed", self.state.host_name(host_id));
                self.policy.on_host_failure(host_id, &mut self.state);
            }
            HostRecovery { host_id } => {
                log_info!(self.state, "Host {} recovered", self.state.host_name(host_id));
                self.policy.on_host_recovery(host_id, &mut self.state);
            }
            VmFailure { vm_id } => {
                self.policy.on_vm_destroy(vm_id, &mut self.state);
            }
            VmRestore { vm_id, host_id } => {
                self.policy.on_vm_restore(vm_id, host_id, &mut self.state);
            }
            UnitSubmitted { vm_id, length } => {
                self.on_unit_submitted(vm_id, length);
            }
            UnitFinished { vm_id, attempt } => {
                self.state.finish_unit(vm_id, attempt);
            }
            TransmissionSubmitted {
                src_vm,
                dst_vm,
                size,
                bandwidth,
            } => {
                log_debug!(
                    self.state,
                    "Transmission of {} from {} to {}",
                    size,
                    self.state.vm_name(src_vm),
                    self.state.vm_name(dst_vm)
                );
                self.policy.on_transmission(size, bandwidth, &mut self.state);
            }
            BackupPlacementSucceeded {
                primary,
                backup_name,
                host_name,
            } => {
                self.policy
                    .on_backup_placed(&primary, &backup_name, &host_name, &mut self.state);
            }
            BackupPlacementFailed { primary, reason } => {
                log_error!(self.state, "Failed to create new backup for {}: {}", primary, reason);
            }
            FailurePredicted { host_id } => {
                self.state.metrics.predicted_failures += 1;
                log_info!(
                    self.state,
                    "Failure of host {} predicted",
                    self.state.host_name(host_id)
                );
            }
        })
    }
}
