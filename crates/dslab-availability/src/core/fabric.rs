//! Hosts, VMs and workload units of the simulated compute fabric.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt::{Display, Formatter};

use serde::Serialize;

pub type HostId = u32;
pub type VmId = u32;
pub type UnitId = u64;

/// Marker separating the primary name from the backup index in backup VM names.
pub const BACKUP_MARKER: &str = "-backup-";

/// Returns the conventional name of backup number `index` of the given primary.
pub fn backup_name(primary: &str, index: u32) -> String {
    format!("{}{}{}", primary, BACKUP_MARKER, index)
}

/// Role of a VM, decided once from its placement name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum VmRole {
    Primary,
    Backup { of_primary: String, index: u32 },
}

impl VmRole {
    /// Derives the role from a `<primary>-backup-<index>` style name.
    ///
    /// A name carrying the marker with a non-numeric suffix is still a backup, ordered after all numbered ones.
    pub fn from_name(name: &str) -> Self {
        match name.find(BACKUP_MARKER) {
            Some(pos) => {
                let suffix = &name[pos + BACKUP_MARKER.len()..];
                VmRole::Backup {
                    of_primary: name[..pos].to_string(),
                    index: suffix.parse().unwrap_or(u32::MAX),
                }
            }
            None => VmRole::Primary,
        }
    }

    pub fn is_backup(&self) -> bool {
        matches!(self, VmRole::Backup { .. })
    }

    /// Returns the index of a backup, `None` for primaries.
    pub fn backup_index(&self) -> Option<u32> {
        match self {
            VmRole::Primary => None,
            VmRole::Backup { index, .. } => Some(*index),
        }
    }
}

/// Status of virtual machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum VmStatus {
    Active,
    Inactive,
    Failed,
}

impl Display for VmStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            VmStatus::Active => write!(f, "active"),
            VmStatus::Inactive => write!(f, "inactive"),
            VmStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Schedulable unit of compute work bound to a VM.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkloadUnit {
    pub id: UnitId,
    pub vm: VmId,
    /// Length in millions of instructions.
    pub length: f64,
    pub submission_time: f64,
}

/// Physical host.
#[derive(Clone, Debug)]
pub struct HostRecord {
    pub id: HostId,
    pub name: String,
    pub cpus: u32,
    pub memory: u64,
    pub failed: bool,
    vms: BTreeSet<VmId>,
}

impl HostRecord {
    /// Returns ids of VMs currently allocated on the host.
    pub fn vms(&self) -> Vec<VmId> {
        self.vms.iter().copied().collect()
    }
}

/// Virtual machine.
///
/// A VM executes one unit at a time using all its processing elements, other units wait in FIFO order.
#[derive(Clone, Debug)]
pub struct VmRecord {
    pub id: VmId,
    pub name: String,
    pub role: VmRole,
    pub status: VmStatus,
    pub host: Option<HostId>,
    pub mips: f64,
    pub pes: u32,
    executing: Option<(WorkloadUnit, u64)>,
    waiting: VecDeque<WorkloadUnit>,
}

impl VmRecord {
    /// Nominal time needed to process the unit on this VM.
    pub fn processing_time(&self, unit: &WorkloadUnit) -> f64 {
        let capacity = self.mips * self.pes as f64;
        if capacity > 0. {
            unit.length / capacity
        } else {
            0.
        }
    }

    /// Number of executing and waiting units.
    pub fn pending_units(&self) -> usize {
        self.executing.iter().count() + self.waiting.len()
    }

    /// Removes executing and waiting units from the VM, executing one first.
    pub fn take_units(&mut self) -> Vec<WorkloadUnit> {
        let mut units: Vec<WorkloadUnit> = self.executing.take().map(|(unit, _)| unit).into_iter().collect();
        units.extend(self.waiting.drain(..));
        units
    }

    /// Queues the unit, returns `true` if the VM is idle and the unit can start right away.
    pub(crate) fn enqueue(&mut self, unit: WorkloadUnit) -> bool {
        self.waiting.push_back(unit);
        self.executing.is_none()
    }

    /// Starts the next waiting unit under the given attempt token, returns its processing time.
    pub(crate) fn start_next(&mut self, attempt: u64) -> Option<f64> {
        if self.executing.is_some() {
            return None;
        }
        let unit = self.waiting.pop_front()?;
        let duration = self.processing_time(&unit);
        self.executing = Some((unit, attempt));
        Some(duration)
    }

    /// Completes the executing unit if it was started under the given attempt token.
    pub(crate) fn finish(&mut self, attempt: u64) -> Option<WorkloadUnit> {
        match &self.executing {
            Some((_, current)) if *current == attempt => self.executing.take().map(|(unit, _)| unit),
            _ => None,
        }
    }
}

/// Redirections of traffic addressed to failed VMs.
#[derive(Clone, Debug, Default)]
pub struct PathTable {
    redirects: HashMap<VmId, VmId>,
}

impl PathTable {
    /// Redirects traffic addressed to `from` towards `to`.
    pub fn add_extra_path(&mut self, from: VmId, to: VmId) {
        self.redirects.insert(from, to);
    }

    /// Follows redirects starting from `vm`.
    pub fn resolve(&self, vm: VmId) -> VmId {
        let mut current = vm;
        for _ in 0..=self.redirects.len() {
            match self.redirects.get(&current) {
                Some(next) if *next != current => current = *next,
                _ => break,
            }
        }
        current
    }
}

/// Host and VM collections of a datacenter.
#[derive(Clone, Debug, Default)]
pub struct Fabric {
    hosts: BTreeMap<HostId, HostRecord>,
    vms: BTreeMap<VmId, VmRecord>,
    host_ids: HashMap<String, HostId>,
    vm_ids: HashMap<String, VmId>,
    pub paths: PathTable,
    next_unit_id: UnitId,
}

impl Fabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds host, returns its id. Adding a host with an existing name returns the existing id.
    pub fn add_host(&mut self, name: &str, cpus: u32, memory: u64) -> HostId {
        if let Some(id) = self.host_ids.get(name) {
            return *id;
        }
        let id = self.hosts.len() as HostId;
        self.hosts.insert(
            id,
            HostRecord {
                id,
                name: name.to_string(),
                cpus,
                memory,
                failed: false,
                vms: BTreeSet::new(),
            },
        );
        self.host_ids.insert(name.to_string(), id);
        id
    }

    /// Adds unallocated VM with the role derived from its name, returns its id.
    ///
    /// Primaries start active, backups inactive.
    pub fn add_vm(&mut self, name: &str, mips: f64, pes: u32) -> VmId {
        self.add_vm_with_role(name, VmRole::from_name(name), mips, pes)
    }

    /// Adds unallocated VM with the given role. Adding a VM with an existing name returns the existing id.
    pub fn add_vm_with_role(&mut self, name: &str, role: VmRole, mips: f64, pes: u32) -> VmId {
        if let Some(id) = self.vm_ids.get(name) {
            return *id;
        }
        let id = self.vms.len() as VmId;
        let status = if role.is_backup() {
            VmStatus::Inactive
        } else {
            VmStatus::Active
        };
        self.vms.insert(
            id,
            VmRecord {
                id,
                name: name.to_string(),
                role,
                status,
                host: None,
                mips,
                pes,
                executing: None,
                waiting: VecDeque::new(),
            },
        );
        self.vm_ids.insert(name.to_string(), id);
        id
    }

    pub fn host(&self, id: HostId) -> Option<&HostRecord> {
        self.hosts.get(&id)
    }

    pub fn host_mut(&mut self, id: HostId) -> Option<&mut HostRecord> {
        self.hosts.get_mut(&id)
    }

    pub fn host_id(&self, name: &str) -> Option<HostId> {
        self.host_ids.get(name).copied()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &HostRecord> {
        self.hosts.values()
    }

    pub fn vm(&self, id: VmId) -> Option<&VmRecord> {
        self.vms.get(&id)
    }

    pub fn vm_mut(&mut self, id: VmId) -> Option<&mut VmRecord> {
        self.vms.get_mut(&id)
    }

    pub fn vm_id(&self, name: &str) -> Option<VmId> {
        self.vm_ids.get(name).copied()
    }

    pub fn vm_by_name(&self, name: &str) -> Option<&VmRecord> {
        self.vm_id(name).and_then(|id| self.vm(id))
    }

    pub fn vms(&self) -> impl Iterator<Item = &VmRecord> {
        self.vms.values()
    }

    /// Number of VMs that have not failed.
    pub fn live_vm_count(&self) -> usize {
        self.vms.values().filter(|vm| vm.status != VmStatus::Failed).count()
    }

    pub fn is_host_failed(&self, id: HostId) -> bool {
        self.hosts.get(&id).map_or(false, |host| host.failed)
    }

    /// Whether the VM is allocated on a healthy host and has not failed.
    pub fn is_vm_serving(&self, id: VmId) -> bool {
        match self.vms.get(&id) {
            Some(vm) => vm.status != VmStatus::Failed && vm.host.map_or(false, |host| !self.is_host_failed(host)),
            None => false,
        }
    }

    /// Allocates VM on host. Returns `false` if either is unknown.
    pub fn allocate(&mut self, vm_id: VmId, host_id: HostId) -> bool {
        if !self.hosts.contains_key(&host_id) || !self.vms.contains_key(&vm_id) {
            return false;
        }
        self.deallocate(vm_id);
        if let Some(host) = self.hosts.get_mut(&host_id) {
            host.vms.insert(vm_id);
        }
        if let Some(vm) = self.vms.get_mut(&vm_id) {
            vm.host = Some(host_id);
        }
        true
    }

    /// Releases VM from its host, returns the host it was allocated on.
    pub fn deallocate(&mut self, vm_id: VmId) -> Option<HostId> {
        let host_id = self.vms.get_mut(&vm_id)?.host.take()?;
        if let Some(host) = self.hosts.get_mut(&host_id) {
            host.vms.remove(&vm_id);
        }
        Some(host_id)
    }

    pub(crate) fn next_unit_id(&mut self) -> UnitId {
        let id = self.next_unit_id;
        self.next_unit_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_from_names() {
        assert_eq!(VmRole::from_name("web0"), VmRole::Primary);
        assert_eq!(
            VmRole::from_name("web0-backup-12"),
            VmRole::Backup {
                of_primary: "web0".to_string(),
                index: 12
            }
        );
        assert_eq!(VmRole::from_name("db-backup-x").backup_index(), Some(u32::MAX));
        assert_eq!(backup_name("web0", 3), "web0-backup-3");
    }

    #[test]
    fn test_allocation() {
        let mut fabric = Fabric::new();
        let h1 = fabric.add_host("h1", 4, 8);
        let h2 = fabric.add_host("h2", 4, 8);
        let vm = fabric.add_vm("web0", 1000., 1);
        let backup = fabric.add_vm("web0-backup-0", 1000., 1);
        assert_eq!(fabric.vm(backup).unwrap().status, VmStatus::Inactive);
        assert!(!fabric.is_vm_serving(vm));

        assert!(fabric.allocate(vm, h1));
        assert!(fabric.is_vm_serving(vm));
        assert_eq!(fabric.host(h1).unwrap().vms(), vec![vm]);

        assert!(fabric.allocate(vm, h2));
        assert!(fabric.host(h1).unwrap().vms().is_empty());
        fabric.host_mut(h2).unwrap().failed = true;
        assert!(!fabric.is_vm_serving(vm));

        assert_eq!(fabric.deallocate(vm), Some(h2));
        assert_eq!(fabric.deallocate(vm), None);
        assert!(!fabric.allocate(vm, 42));
    }

    #[test]
    fn test_unit_queue() {
        let mut fabric = Fabric::new();
        let vm_id = fabric.add_vm("web0", 100., 2);
        let vm = fabric.vm_mut(vm_id).unwrap();
        let unit = |id| WorkloadUnit {
            id,
            vm: vm_id,
            length: 400.,
            submission_time: 0.,
        };
        assert!(vm.enqueue(unit(0)));
        assert_eq!(vm.start_next(7), Some(2.));
        assert!(!vm.enqueue(unit(1)));
        assert_eq!(vm.start_next(8), None);
        assert_eq!(vm.pending_units(), 2);

        assert_eq!(vm.finish(6), None);
        assert_eq!(vm.finish(7).map(|u| u.id), Some(0));
        assert_eq!(vm.start_next(9), Some(2.));
        assert!(!vm.enqueue(unit(2)));
        let taken: Vec<UnitId> = vm.take_units().into_iter().map(|u| u.id).collect();
        assert_eq!(taken, vec![1, 2]);
        assert_eq!(vm.finish(9), None);
    }

    #[test]
    fn test_path_redirects() {
        let mut paths = PathTable::default();
        paths.add_extra_path(1, 2);
        paths.add_extra_path(2, 3);
        assert_eq!(paths.resolve(1), 3);
        assert_eq!(paths.resolve(4), 4);
        paths.add_extra_path(3, 1);
        let end = paths.resolve(1);
        assert!([1, 2, 3].contains(&end));
    }
}
