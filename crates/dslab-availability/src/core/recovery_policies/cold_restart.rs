//! Cold restart: VMs of a failed host are recreated on the same host once it recovers.

use std::collections::HashMap;

use dslab_core::{log_debug, log_info, log_warn};

use crate::core::config::PolicyKind;
use crate::core::datacenter::PolicyContext;
use crate::core::events::failure::VmRestore;
use crate::core::fabric::{HostId, VmId, VmStatus, WorkloadUnit};
use crate::core::recovery_policy::RecoveryPolicy;

/// Restores VMs destroyed by a host failure after the host recovers and a fixed recovery delay passes.
///
/// Work of a failed VM is buffered and resubmitted on restore. VMs destroyed by the VM failure trace
/// are not tied to a host failure and stay failed.
pub struct ColdRestart {
    recovery_delay: f64,
    failed_vms: HashMap<HostId, Vec<VmId>>,
    failure_times: HashMap<VmId, f64>,
    buffered_units: HashMap<String, Vec<WorkloadUnit>>,
    downtime: HashMap<String, f64>,
}

impl ColdRestart {
    pub fn new(recovery_delay: f64) -> Self {
        Self {
            recovery_delay,
            failed_vms: HashMap::new(),
            failure_times: HashMap::new(),
            buffered_units: HashMap::new(),
            downtime: HashMap::new(),
        }
    }
}

impl RecoveryPolicy for ColdRestart {
    fn kind(&self) -> PolicyKind {
        PolicyKind::ColdRestart
    }

    fn on_host_failure(&mut self, host_id: HostId, ctx: &mut PolicyContext) {
        if !ctx.fail_host(host_id) {
            return;
        }
        let vms = ctx.resident_vms(host_id);
        let failed = self.failed_vms.entry(host_id).or_default();
        for vm_id in vms {
            if !failed.contains(&vm_id) {
                failed.push(vm_id);
            }
            ctx.destroy_vm(vm_id);
        }
    }

    fn on_host_recovery(&mut self, host_id: HostId, ctx: &mut PolicyContext) {
        if !ctx.recover_host(host_id) {
            log_debug!(ctx, "Host {} is not failed, ignoring recovery", ctx.host_name(host_id));
            return;
        }
        let vms = self.failed_vms.remove(&host_id).unwrap_or_default();
        if vms.is_empty() {
            log_info!(ctx, "No VMs to recover on host {}", ctx.host_name(host_id));
            return;
        }
        for vm_id in vms {
            log_info!(
                ctx,
                "Scheduling restore of VM {} on host {} in {}",
                ctx.vm_name(vm_id),
                ctx.host_name(host_id),
                self.recovery_delay
            );
            ctx.emit_self(VmRestore { vm_id, host_id }, self.recovery_delay);
        }
    }

    fn on_vm_destroy(&mut self, vm_id: VmId, ctx: &mut PolicyContext) {
        if !ctx.begin_vm_failure(vm_id) {
            return;
        }
        self.failure_times.insert(vm_id, ctx.time());
        let (name, units) = {
            let mut fabric = ctx.fabric.borrow_mut();
            fabric.deallocate(vm_id);
            match fabric.vm_mut(vm_id) {
                Some(vm) => (vm.name.clone(), vm.take_units()),
                None => return,
            }
        };
        log_info!(ctx, "VM {} destroyed, buffering {} units", name, units.len());
        self.buffered_units.entry(name).or_default().extend(units);
    }

    fn on_vm_restore(&mut self, vm_id: VmId, host_id: HostId, ctx: &mut PolicyContext) {
        if ctx.fabric.borrow().is_host_failed(host_id) {
            log_warn!(
                ctx,
                "Host {} failed again before VM {} was restored",
                ctx.host_name(host_id),
                ctx.vm_name(vm_id)
            );
            let failed = self.failed_vms.entry(host_id).or_default();
            if !failed.contains(&vm_id) {
                failed.push(vm_id);
            }
            return;
        }
        let now = ctx.time();
        let downtime = now - self.failure_times.remove(&vm_id).unwrap_or(now);
        let name = {
            let mut fabric = ctx.fabric.borrow_mut();
            if !fabric.allocate(vm_id, host_id) {
                return;
            }
            match fabric.vm_mut(vm_id) {
                Some(vm) => {
                    vm.status = if vm.role.is_backup() {
                        VmStatus::Inactive
                    } else {
                        VmStatus::Active
                    };
                    vm.name.clone()
                }
                None => return,
            }
        };
        ctx.metrics.total_downtime += downtime;
        *self.downtime.entry(name.clone()).or_default() += downtime;

        let units = self.buffered_units.remove(&name).unwrap_or_default();
        log_info!(
            ctx,
            "VM {} restored on host {} after downtime {:.3}, resubmitting {} units",
            name,
            ctx.host_name(host_id),
            downtime,
            units.len()
        );
        for unit in units {
            ctx.metrics.total_processing_delay += downtime;
            ctx.run_unit(unit);
        }
    }

    fn on_workload_dispatch(&mut self, unit: WorkloadUnit, ctx: &mut PolicyContext) {
        ctx.metrics.total_processing_delay += ctx.processing_time(&unit);
        if ctx.is_vm_serving(unit.vm) {
            ctx.run_unit(unit);
            return;
        }
        ctx.metrics.total_cloudlets_failed += 1;
        ctx.add_waiting_delay(&unit);
        let name = ctx.vm_name(unit.vm);
        log_debug!(ctx, "VM {} is down, buffering unit {}", name, unit.id);
        self.buffered_units.entry(name).or_default().push(unit);
    }

    fn vm_downtime(&self, vm_name: &str) -> Option<f64> {
        self.downtime.get(vm_name).copied()
    }
}
