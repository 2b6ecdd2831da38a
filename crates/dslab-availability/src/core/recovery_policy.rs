//! Interface of recovery policies.

use crate::core::config::PolicyKind;
use crate::core::datacenter::PolicyContext;
use crate::core::fabric::{Fabric, HostId, VmId, WorkloadUnit};
use crate::core::placement::PlacementTable;
use crate::core::recovery_policies::cold_restart::ColdRestart;
use crate::core::recovery_policies::no_recovery::NoRecovery;
use crate::core::recovery_policies::warm_standby::WarmStandby;

/// Reaction of the datacenter to host and VM failures.
///
/// Handlers are invoked by the datacenter in simulated-time order and may change the fabric state,
/// metrics and schedule further events through [`PolicyContext`].
pub trait RecoveryPolicy {
    fn kind(&self) -> PolicyKind;

    /// Host went down.
    fn on_host_failure(&mut self, host_id: HostId, ctx: &mut PolicyContext);

    /// Host is back up. Recovery of a host that is not failed must be a no-op.
    fn on_host_recovery(&mut self, host_id: HostId, ctx: &mut PolicyContext);

    /// VM is destroyed. Destroying a VM that has already failed must be ignored.
    fn on_vm_destroy(&mut self, vm_id: VmId, ctx: &mut PolicyContext);

    /// Unit of work is about to run on its VM.
    fn on_workload_dispatch(&mut self, unit: WorkloadUnit, ctx: &mut PolicyContext);

    /// Previously failed VM is due to be restored on the given host.
    fn on_vm_restore(&mut self, _vm_id: VmId, _host_id: HostId, _ctx: &mut PolicyContext) {}

    /// External solver placed a new backup VM for the primary.
    fn on_backup_placed(&mut self, _primary: &str, _backup_name: &str, _host_name: &str, _ctx: &mut PolicyContext) {}

    /// Data transfer between VMs has been issued.
    fn on_transmission(&mut self, size: f64, bandwidth: f64, ctx: &mut PolicyContext) {
        if bandwidth > 0. {
            ctx.metrics.total_transmission_delay += size * 8. / bandwidth;
        }
    }

    /// Accumulated downtime of the VM with the given name, if the policy tracks it.
    fn vm_downtime(&self, _vm_name: &str) -> Option<f64> {
        None
    }

    /// Backup names of the primary in promotion order, if the policy keeps backups.
    fn backup_pool(&self, _primary: &str) -> Option<Vec<String>> {
        None
    }

    /// Name of the backup standing in for the failed VM.
    fn active_backup(&self, _failed_vm: &str) -> Option<String> {
        None
    }
}

/// Creates policy of the given kind.
pub fn build_policy(
    kind: PolicyKind,
    placements: &PlacementTable,
    fabric: &Fabric,
    recovery_delay: f64,
) -> Box<dyn RecoveryPolicy> {
    match kind {
        PolicyKind::NoRecovery => Box::new(NoRecovery::new()),
        PolicyKind::ColdRestart => Box::new(ColdRestart::new(recovery_delay)),
        PolicyKind::WarmStandby => Box::new(WarmStandby::new(placements, fabric, recovery_delay)),
    }
}
