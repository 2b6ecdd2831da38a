//! Warm standby: a failed VM is replaced by one of the pre-placed backups of its primary.

use std::collections::{BTreeMap, HashMap};

use dslab_core::{log_debug, log_error, log_info, log_warn};

use crate::core::config::PolicyKind;
use crate::core::datacenter::PolicyContext;
use crate::core::fabric::{Fabric, HostId, VmId, VmRole, VmStatus, WorkloadUnit};
use crate::core::placement::PlacementTable;
use crate::core::recovery_policy::RecoveryPolicy;

/// Ordered backups of each primary.
#[derive(Clone, Debug, Default)]
pub struct BackupPool {
    pools: BTreeMap<String, Vec<(u32, String)>>,
}

impl BackupPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts backup keeping the pool sorted by index. Returns `false` if the backup is already known.
    pub fn insert(&mut self, primary: &str, index: u32, backup: &str) -> bool {
        if self.contains(backup) {
            return false;
        }
        let pool = self.pools.entry(primary.to_string()).or_default();
        let pos = pool.partition_point(|(other, _)| *other <= index);
        pool.insert(pos, (index, backup.to_string()));
        true
    }

    pub fn contains(&self, backup: &str) -> bool {
        self.pools
            .values()
            .any(|pool| pool.iter().any(|(_, name)| name == backup))
    }

    /// Backup names of the primary in promotion order.
    pub fn backups(&self, primary: &str) -> Option<Vec<String>> {
        self.pools
            .get(primary)
            .map(|pool| pool.iter().map(|(_, name)| name.clone()).collect())
    }

    /// Index for a backup added after all existing ones.
    pub fn next_index(&self, primary: &str) -> u32 {
        self.pools
            .get(primary)
            .and_then(|pool| pool.iter().map(|(index, _)| *index).filter(|index| *index != u32::MAX).max())
            .map_or(0, |index| index + 1)
    }
}

/// On VM failure promotes the first eligible backup of its primary, moves the failed VM's work and traffic
/// to it and asks the provisioner for a replacement backup.
pub struct WarmStandby {
    recovery_delay: f64,
    pool: BackupPool,
    active_backups: HashMap<String, String>,
    failure_times: HashMap<VmId, f64>,
    downtime: HashMap<String, f64>,
}

impl WarmStandby {
    /// Builds backup pools from the backups in the placement table.
    ///
    /// Backups placed on unknown or failed hosts are left out.
    pub fn new(placements: &PlacementTable, fabric: &Fabric, recovery_delay: f64) -> Self {
        let mut pool = BackupPool::new();
        for (vm_name, host_name) in placements.iter() {
            if let VmRole::Backup { of_primary, index } = VmRole::from_name(vm_name) {
                match fabric.host_id(host_name) {
                    Some(host_id) if !fabric.is_host_failed(host_id) => {
                        pool.insert(&of_primary, index, vm_name);
                    }
                    _ => {
                        log::warn!("Backup VM {} is placed on unavailable host {}, skipping", vm_name, host_name);
                    }
                }
            }
        }
        Self {
            recovery_delay,
            pool,
            active_backups: HashMap::new(),
            failure_times: HashMap::new(),
            downtime: HashMap::new(),
        }
    }

    /// Promotes the first backup of the primary which has not failed and runs on a healthy host.
    fn activate_backup(&mut self, primary: &str, failed_vm: &str, ctx: &mut PolicyContext) -> Option<VmId> {
        let candidates = match self.pool.backups(primary) {
            Some(candidates) => candidates,
            None => {
                log_warn!(ctx, "No backup VMs available for {}", primary);
                return None;
            }
        };
        let mut fabric = ctx.fabric.borrow_mut();
        let mut chosen = None;
        for name in candidates.iter().filter(|name| name.as_str() != failed_vm) {
            let vm_id = match fabric.vm_id(name) {
                Some(id) => id,
                None => continue,
            };
            if !fabric.is_vm_serving(vm_id) {
                continue;
            }
            if let Some(vm) = fabric.vm_mut(vm_id) {
                vm.status = VmStatus::Active;
                chosen = Some((vm_id, name.clone()));
                break;
            }
        }
        drop(fabric);
        let (vm_id, name) = chosen?;
        // VMs which were served by the failed one are now served by the new standby.
        for active in self.active_backups.values_mut() {
            if *active == failed_vm {
                *active = name.clone();
            }
        }
        self.active_backups.insert(failed_vm.to_string(), name);
        Some(vm_id)
    }
}

impl RecoveryPolicy for WarmStandby {
    fn kind(&self) -> PolicyKind {
        PolicyKind::WarmStandby
    }

    fn on_host_failure(&mut self, host_id: HostId, ctx: &mut PolicyContext) {
        if !ctx.fail_host(host_id) {
            return;
        }
        let now = ctx.time();
        let fabric = ctx.fabric.borrow();
        let victims: Vec<VmId> = ctx
            .resident_vms(host_id)
            .into_iter()
            .filter(|vm_id| {
                fabric
                    .vm(*vm_id)
                    .map_or(false, |vm| !vm.role.is_backup() || vm.status == VmStatus::Active)
            })
            .collect();
        drop(fabric);
        for vm_id in victims {
            self.failure_times.insert(vm_id, now);
            ctx.destroy_vm(vm_id);
        }
    }

    fn on_host_recovery(&mut self, host_id: HostId, ctx: &mut PolicyContext) {
        if !ctx.recover_host(host_id) {
            log_debug!(ctx, "Host {} is not failed, ignoring recovery", ctx.host_name(host_id));
        }
    }

    fn on_vm_destroy(&mut self, vm_id: VmId, ctx: &mut PolicyContext) {
        if !ctx.begin_vm_failure(vm_id) {
            return;
        }
        let now = ctx.time();
        let failure_time = self.failure_times.remove(&vm_id).unwrap_or(now);
        let (name, primary, units) = {
            let mut fabric = ctx.fabric.borrow_mut();
            fabric.deallocate(vm_id);
            match fabric.vm_mut(vm_id) {
                Some(vm) => {
                    let primary = match &vm.role {
                        VmRole::Primary => vm.name.clone(),
                        VmRole::Backup { of_primary, .. } => of_primary.clone(),
                    };
                    (vm.name.clone(), primary, vm.take_units())
                }
                None => return,
            }
        };

        let backup_id = match self.activate_backup(&primary, &name, ctx) {
            Some(id) => id,
            None => {
                log_warn!(ctx, "Failed to activate backup VM for {}, {} units lost", name, units.len());
                ctx.metrics.total_cloudlets_failed += units.len() as u64;
                return;
            }
        };

        let downtime = (ctx.time() - failure_time) + self.recovery_delay;
        ctx.metrics.total_downtime += downtime;
        ctx.metrics.total_processing_delay += downtime;
        *self.downtime.entry(name.clone()).or_default() += downtime;
        ctx.fabric.borrow_mut().paths.add_extra_path(vm_id, backup_id);
        log_info!(
            ctx,
            "VM {} failed, backup {} activated, moving {} units",
            name,
            ctx.vm_name(backup_id),
            units.len()
        );
        for mut unit in units {
            unit.vm = backup_id;
            ctx.run_unit(unit);
        }
        ctx.request_backup(&primary);
    }

    fn on_workload_dispatch(&mut self, mut unit: WorkloadUnit, ctx: &mut PolicyContext) {
        ctx.metrics.total_processing_delay += ctx.processing_time(&unit);
        if ctx.is_vm_serving(unit.vm) {
            ctx.run_unit(unit);
            return;
        }
        ctx.metrics.total_cloudlets_failed += 1;
        ctx.add_waiting_delay(&unit);
        let target = ctx.fabric.borrow().paths.resolve(unit.vm);
        if target != unit.vm && ctx.is_vm_serving(target) {
            log_debug!(
                ctx,
                "Redirecting unit {} from failed VM {} to {}",
                unit.id,
                ctx.vm_name(unit.vm),
                ctx.vm_name(target)
            );
            unit.vm = target;
            ctx.run_unit(unit);
        } else {
            log_debug!(ctx, "No standby for failed VM {}, unit {} dropped", ctx.vm_name(unit.vm), unit.id);
        }
    }

    fn on_backup_placed(&mut self, primary: &str, backup_name: &str, host_name: &str, ctx: &mut PolicyContext) {
        let mut fabric = ctx.fabric.borrow_mut();
        let host_id = match fabric.host_id(host_name) {
            Some(id) if !fabric.is_host_failed(id) => id,
            _ => {
                drop(fabric);
                log_error!(ctx, "Invalid host {} for new backup {}", host_name, backup_name);
                return;
            }
        };
        let (mips, pes) = match fabric.vm_by_name(primary) {
            Some(vm) => (vm.mips, vm.pes),
            None => {
                drop(fabric);
                log_error!(ctx, "Unknown primary {} of new backup {}", primary, backup_name);
                return;
            }
        };
        if fabric.vm_id(backup_name).is_some() || self.pool.contains(backup_name) {
            drop(fabric);
            log_error!(ctx, "Backup {} already exists", backup_name);
            return;
        }
        let index = match VmRole::from_name(backup_name) {
            VmRole::Backup { of_primary, index } if of_primary == primary && index != u32::MAX => index,
            _ => self.pool.next_index(primary),
        };
        let role = VmRole::Backup {
            of_primary: primary.to_string(),
            index,
        };
        let vm_id = fabric.add_vm_with_role(backup_name, role, mips, pes);
        fabric.allocate(vm_id, host_id);
        drop(fabric);
        self.pool.insert(primary, index, backup_name);
        log_info!(ctx, "Created new backup VM {} on host {}", backup_name, host_name);
    }

    fn vm_downtime(&self, vm_name: &str) -> Option<f64> {
        self.downtime.get(vm_name).copied()
    }

    fn backup_pool(&self, primary: &str) -> Option<Vec<String>> {
        self.pool.backups(primary)
    }

    fn active_backup(&self, failed_vm: &str) -> Option<String> {
        self.active_backups.get(failed_vm).cloned()
    }
}
