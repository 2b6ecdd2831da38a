//! Baseline policy: failed VMs are never restored.

use dslab_core::{log_debug, log_info};

use crate::core::config::PolicyKind;
use crate::core::datacenter::PolicyContext;
use crate::core::fabric::{HostId, VmId, WorkloadUnit};
use crate::core::recovery_policy::RecoveryPolicy;

/// Destroys VMs of failed hosts and abandons their work.
///
/// Neither downtime nor failed units are accounted. The failure counter is reset after every host failure,
/// so the reported number of failures is zero.
#[derive(Default)]
pub struct NoRecovery;

impl NoRecovery {
    pub fn new() -> Self {
        Self
    }
}

impl RecoveryPolicy for NoRecovery {
    fn kind(&self) -> PolicyKind {
        PolicyKind::NoRecovery
    }

    fn on_host_failure(&mut self, host_id: HostId, ctx: &mut PolicyContext) {
        if !ctx.fail_host(host_id) {
            return;
        }
        for vm_id in ctx.resident_vms(host_id) {
            ctx.destroy_vm(vm_id);
        }
        ctx.metrics.total_failures = 0;
    }

    fn on_host_recovery(&mut self, host_id: HostId, ctx: &mut PolicyContext) {
        if ctx.recover_host(host_id) {
            log_debug!(ctx, "No VMs are restored on host {}", ctx.host_name(host_id));
        }
    }

    fn on_vm_destroy(&mut self, vm_id: VmId, ctx: &mut PolicyContext) {
        if !ctx.begin_vm_failure(vm_id) {
            return;
        }
        let abandoned = {
            let mut fabric = ctx.fabric.borrow_mut();
            fabric.deallocate(vm_id);
            fabric.vm_mut(vm_id).map_or(0, |vm| vm.take_units().len())
        };
        log_info!(ctx, "VM {} destroyed, {} units abandoned", ctx.vm_name(vm_id), abandoned);
    }

    fn on_workload_dispatch(&mut self, unit: WorkloadUnit, ctx: &mut PolicyContext) {
        ctx.metrics.total_processing_delay += ctx.processing_time(&unit);
        if !ctx.is_vm_serving(unit.vm) {
            log_debug!(ctx, "Unit {} addressed to failed VM {} dropped", unit.id, ctx.vm_name(unit.vm));
            return;
        }
        ctx.run_unit(unit);
    }
}
