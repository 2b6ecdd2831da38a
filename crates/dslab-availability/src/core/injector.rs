//! Injection of VM failures from the VM failure trace.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use dslab_core::cast;
use dslab_core::component::Id;
use dslab_core::context::SimulationContext;
use dslab_core::event::Event;
use dslab_core::handler::EventHandler;
use dslab_core::{log_debug, log_info, log_warn};

use crate::core::events::failure::{DeploymentCompleted, VmFailure};
use crate::core::fabric::Fabric;
use crate::core::trace::{TraceEvent, TraceEventKind};

/// Schedules VM destructions once the application is deployed.
///
/// At most one failure is scheduled per VM name, backups are never targeted, and the number of
/// scheduled failures does not exceed the number of live VMs at deployment time.
pub struct VmFailureInjector {
    events: Vec<TraceEvent>,
    fabric: Rc<RefCell<Fabric>>,
    datacenter_id: Id,
    scheduled: usize,
    ctx: SimulationContext,
}

impl VmFailureInjector {
    pub fn new(events: Vec<TraceEvent>, fabric: Rc<RefCell<Fabric>>, datacenter_id: Id, ctx: SimulationContext) -> Self {
        Self {
            events,
            fabric,
            datacenter_id,
            scheduled: 0,
            ctx,
        }
    }

    pub fn id(&self) -> Id {
        self.ctx.id()
    }

    /// Number of VM failures scheduled so far.
    pub fn scheduled(&self) -> usize {
        self.scheduled
    }

    fn schedule_failures(&mut self) {
        let events = std::mem::take(&mut self.events);
        let fabric = self.fabric.borrow();
        let limit = fabric.live_vm_count();
        let mut targeted = HashSet::new();
        let mut scheduled = 0;

        for event in events.iter().filter(|event| event.kind == TraceEventKind::Failure) {
            if scheduled >= limit {
                break;
            }
            if targeted.contains(event.node_id.as_str()) {
                continue;
            }
            let vm = match fabric.vm_by_name(&event.node_id) {
                Some(vm) => vm,
                None => {
                    log_debug!(self.ctx, "VM {} from trace not found, skipping", event.node_id);
                    continue;
                }
            };
            if vm.role.is_backup() {
                continue;
            }
            if event.timestamp < 0. {
                log_warn!(
                    self.ctx,
                    "Skipping failure of VM {} at negative time {}",
                    event.node_id,
                    event.timestamp
                );
                continue;
            }
            self.ctx
                .emit(VmFailure { vm_id: vm.id }, self.datacenter_id, event.timestamp);
            log_debug!(self.ctx, "Scheduled failure of VM {} at {}", vm.name, event.timestamp);
            targeted.insert(event.node_id.as_str());
            scheduled += 1;
        }
        drop(fabric);

        self.scheduled += scheduled;
        log_info!(self.ctx, "Successfully scheduled {} VM failure events", scheduled);
    }
}

impl EventHandler for VmFailureInjector {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            DeploymentCompleted {} => {
                self.schedule_failures();
            }
        })
    }
}
