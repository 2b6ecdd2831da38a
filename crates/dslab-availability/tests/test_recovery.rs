use std::sync::Arc;

use dslab_core::simulation::Simulation;

use dslab_availability::core::config::{PolicyKind, SimulationConfig};
use dslab_availability::core::fabric::VmStatus;
use dslab_availability::core::placement::PlacementTable;
use dslab_availability::core::provisioner::BackupPlacement;
use dslab_availability::core::trace::{TraceEvent, TraceEventKind};
use dslab_availability::error::SolverError;
use dslab_availability::simulation::{AvailabilitySimulation, SimulationInputs};

fn placements(pairs: &[(&str, &str)]) -> PlacementTable {
    let mut table = PlacementTable::new();
    for (vm, host) in pairs {
        table.insert(vm, host);
    }
    table
}

fn failure(node: &str, timestamp: f64) -> TraceEvent {
    TraceEvent {
        timestamp,
        node_id: node.to_string(),
        kind: TraceEventKind::Failure,
    }
}

fn recovery(node: &str, timestamp: f64) -> TraceEvent {
    TraceEvent {
        timestamp,
        node_id: node.to_string(),
        kind: TraceEventKind::Recovery,
    }
}

fn build(policy: PolicyKind, delay: f64, inputs: SimulationInputs) -> AvailabilitySimulation {
    let mut config = SimulationConfig::default().with_policy(policy);
    config.vm_recovery_delay = delay;
    AvailabilitySimulation::with_inputs(Simulation::new(), config, inputs)
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

// Solver placing the next backup on host h1 under the conventional name.
fn next_backup_solver(index: u32) -> impl Fn(&str) -> Result<BackupPlacement, SolverError> + Send + Sync {
    move |primary: &str| {
        Ok(BackupPlacement {
            backup_name: format!("{}-backup-{}", primary, index),
            host_name: "h1".to_string(),
        })
    }
}

#[test]
// One host with one VM fails at t=10 and recovers at t=15.
// Without recovery delay the VM is restored at t=15, so its downtime is exactly 5.
fn test_cold_restart_downtime() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0")]),
        host_events: vec![failure("h0", 10.), recovery("h0", 15.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::ColdRestart, 0., inputs);
    sim.step_until_no_events();

    assert_eq!(sim.vm_status("web0"), Some(VmStatus::Active));
    assert_close(sim.vm_downtime("web0").unwrap(), 5.);
    let metrics = sim.metrics();
    assert_close(metrics.total_downtime, 5.);
    assert_eq!(metrics.total_failures, 1);
    assert_close(sim.finalize().availability, 95.);
}

#[test]
// Restore happens recovery delay after the host recovers, so the delay adds to downtime.
fn test_cold_restart_downtime_with_delay() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0")]),
        host_events: vec![failure("h0", 10.), recovery("h0", 15.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::ColdRestart, 0.2, inputs);
    sim.step_until_no_events();

    assert_close(sim.metrics().total_downtime, 5.2);
    assert_eq!(sim.current_time(), 15.2);
}

#[test]
// Unit of 10 s starts at t=0, host fails at t=5 and recovers at t=6.
// The unit is buffered, restarted at t=6 and completes at t=16, the stale completion at t=10 is ignored.
// Processing delay = 10 (nominal) + 1 (downtime accounted for the resubmitted unit).
fn test_cold_restart_resubmits_buffered_units() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0")]),
        host_events: vec![failure("h0", 5.), recovery("h0", 6.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::ColdRestart, 0., inputs);
    sim.submit_unit("web0", 10000., 0.);
    sim.step_until_no_events();

    let metrics = sim.metrics();
    assert_eq!(metrics.completed_units, 1);
    assert_eq!(metrics.total_cloudlets_failed, 0);
    assert_close(metrics.total_processing_delay, 11.);
    assert_eq!(sim.current_time(), 16.);
}

#[test]
// Unit dispatched while the VM is down counts as failed and waits in the buffer until restore.
fn test_cold_restart_buffers_units_for_failed_vm() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0")]),
        host_events: vec![failure("h0", 10.), recovery("h0", 20.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::ColdRestart, 0., inputs);
    sim.submit_unit("web0", 1000., 12.);
    sim.step_until_no_events();

    let metrics = sim.metrics();
    assert_eq!(metrics.total_cloudlets_failed, 1);
    assert_eq!(metrics.completed_units, 1);
    // 1 (nominal) + 10 (downtime per resubmitted unit)
    assert_close(metrics.total_processing_delay, 11.);
    assert_eq!(sim.current_time(), 21.);
}

#[test]
// Recovery of a host which is not failed changes nothing, repeated recovery restores VMs only once.
fn test_recovery_is_idempotent() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0")]),
        host_events: vec![
            recovery("h0", 5.),
            failure("h0", 10.),
            recovery("h0", 12.),
            recovery("h0", 13.),
        ],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::ColdRestart, 0., inputs);
    sim.step_until_no_events();

    let metrics = sim.metrics();
    assert_eq!(metrics.total_failures, 1);
    assert_close(metrics.total_downtime, 2.);
    assert_eq!(sim.vm_status("web0"), Some(VmStatus::Active));
}

#[test]
// Host fails again before the scheduled restore, VM is restored only after the next recovery.
fn test_cold_restart_host_fails_before_restore() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0")]),
        host_events: vec![
            failure("h0", 10.),
            recovery("h0", 12.),
            failure("h0", 12.5),
            recovery("h0", 20.),
        ],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::ColdRestart, 1., inputs);
    sim.step_for_duration(15.);
    assert_eq!(sim.vm_status("web0"), Some(VmStatus::Failed));

    sim.step_until_no_events();
    assert_eq!(sim.vm_status("web0"), Some(VmStatus::Active));
    assert_close(sim.metrics().total_downtime, 11.);
    assert_eq!(sim.metrics().total_failures, 2);
}

#[test]
// VM destroyed by the VM trace is not tied to a host failure and stays failed.
fn test_cold_restart_keeps_trace_destroyed_vm_failed() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0")]),
        host_events: vec![failure("h0", 10.), recovery("h0", 12.)],
        vm_events: vec![failure("web0", 5.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::ColdRestart, 0., inputs);
    sim.step_until_no_events();

    assert_eq!(sim.vm_status("web0"), Some(VmStatus::Failed));
    assert_eq!(sim.metrics().total_downtime, 0.);
}

#[test]
// Baseline destroys VMs and never restores them, failure counter is reset after every failure.
fn test_no_recovery() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0"), ("db0", "h0"), ("cache0", "h1")]),
        host_events: vec![failure("h0", 10.), recovery("h0", 20.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::NoRecovery, 0., inputs);
    sim.submit_unit("web0", 1000., 15.);
    sim.submit_unit("cache0", 1000., 15.);
    sim.step_until_no_events();

    assert_eq!(sim.vm_status("web0"), Some(VmStatus::Failed));
    assert_eq!(sim.vm_status("db0"), Some(VmStatus::Failed));
    assert_eq!(sim.vm_status("cache0"), Some(VmStatus::Active));
    let metrics = sim.metrics();
    assert_eq!(metrics.total_failures, 0);
    assert_eq!(metrics.total_downtime, 0.);
    assert_eq!(metrics.total_cloudlets_failed, 0);
    assert_eq!(metrics.completed_units, 1);
    assert_close(metrics.total_processing_delay, 2.);
    assert_eq!(sim.finalize().availability, 100.);
}

#[test]
// Destroying web0 promotes its only backup, maps web0 to it and adds the new backup from the solver.
fn test_warm_standby_promotes_backup() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0"), ("web0-backup-0", "h1")]),
        vm_events: vec![failure("web0", 5.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::WarmStandby, 1.43, inputs);
    sim.set_backup_solver(Arc::new(next_backup_solver(1)));
    sim.step_until_no_events();

    assert_eq!(sim.vm_status("web0"), Some(VmStatus::Failed));
    assert_eq!(sim.vm_status("web0-backup-0"), Some(VmStatus::Active));
    assert_eq!(sim.active_backup("web0"), Some("web0-backup-0".to_string()));
    assert_eq!(
        sim.backup_pool("web0").unwrap(),
        vec!["web0-backup-0", "web0-backup-1"]
    );
    assert_eq!(sim.vm_status("web0-backup-1"), Some(VmStatus::Inactive));
    assert_eq!(sim.pending_backup_requests(), 0);

    let metrics = sim.metrics();
    assert_close(metrics.total_downtime, 1.43);
    assert_close(metrics.total_processing_delay, 1.43);
}

#[test]
// Work of the failed primary moves to the backup, later units are redirected to it.
fn test_warm_standby_moves_work_to_backup() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0"), ("web0-backup-0", "h1")]),
        host_events: vec![failure("h0", 1.5)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::WarmStandby, 0., inputs);
    sim.submit_unit("web0", 1000., 1.);
    sim.submit_unit("web0", 1000., 1.);
    sim.submit_unit("web0", 1000., 5.);
    sim.step_until_no_events();

    let metrics = sim.metrics();
    assert_eq!(metrics.completed_units, 3);
    assert_eq!(metrics.total_cloudlets_failed, 1);
    assert_eq!(metrics.total_failures, 1);
    assert_eq!(sim.active_backup("web0"), Some("web0-backup-0".to_string()));
    let fabric = sim.fabric();
    let fabric = fabric.borrow();
    let web0 = fabric.vm_id("web0").unwrap();
    let backup = fabric.vm_id("web0-backup-0").unwrap();
    assert_eq!(fabric.paths.resolve(web0), backup);
}

#[test]
// Without eligible backups all pending and executing units of the victim are lost.
fn test_warm_standby_without_backups() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0")]),
        vm_events: vec![failure("web0", 1.5)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::WarmStandby, 1.43, inputs);
    for _ in 0..3 {
        sim.submit_unit("web0", 1000., 1.);
    }
    sim.step_until_no_events();

    let metrics = sim.metrics();
    assert_eq!(metrics.total_cloudlets_failed, 3);
    assert_eq!(metrics.total_downtime, 0.);
    assert_eq!(metrics.completed_units, 0);
    assert!(sim.backup_pool("web0").is_none());
    assert!(sim.active_backup("web0").is_none());
}

#[test]
// Backups on the failed host are not eligible, promotion skips to the next one.
fn test_warm_standby_skips_backups_on_failed_host() {
    let inputs = SimulationInputs {
        placements: placements(&[
            ("web0", "h0"),
            ("web0-backup-0", "h0"),
            ("web0-backup-1", "h2"),
        ]),
        host_events: vec![failure("h0", 10.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::WarmStandby, 0., inputs);
    sim.step_until_no_events();

    assert_eq!(sim.vm_status("web0-backup-0"), Some(VmStatus::Inactive));
    assert_eq!(sim.vm_status("web0-backup-1"), Some(VmStatus::Active));
    assert_eq!(sim.active_backup("web0"), Some("web0-backup-1".to_string()));
}

#[test]
// New backups are inserted into the pool according to their index.
fn test_warm_standby_backup_ordering() {
    let inputs = SimulationInputs {
        placements: placements(&[
            ("web0", "h0"),
            ("web0-backup-2", "h1"),
            ("web0-backup-0", "h2"),
        ]),
        vm_events: vec![failure("web0", 5.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::WarmStandby, 0., inputs);
    sim.set_backup_solver(Arc::new(next_backup_solver(1)));
    assert_eq!(
        sim.backup_pool("web0").unwrap(),
        vec!["web0-backup-0", "web0-backup-2"]
    );
    sim.step_until_no_events();

    assert_eq!(sim.active_backup("web0"), Some("web0-backup-0".to_string()));
    assert_eq!(
        sim.backup_pool("web0").unwrap(),
        vec!["web0-backup-0", "web0-backup-1", "web0-backup-2"]
    );
}

#[test]
// Failed solver leaves the pool unchanged.
fn test_warm_standby_solver_failure() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0"), ("web0-backup-0", "h1")]),
        vm_events: vec![failure("web0", 5.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::WarmStandby, 0., inputs);
    sim.set_backup_solver(Arc::new(|_: &str| -> Result<BackupPlacement, SolverError> {
        Err(SolverError::Rejected("no capacity".to_string()))
    }));
    sim.step_until_no_events();

    assert_eq!(sim.vm_status("web0-backup-0"), Some(VmStatus::Active));
    assert_eq!(sim.backup_pool("web0").unwrap(), vec!["web0-backup-0"]);
}

#[test]
// Solver reply naming a failed host is rejected.
fn test_warm_standby_rejects_backup_on_failed_host() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0"), ("web0-backup-0", "h1")]),
        host_events: vec![failure("h0", 5.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::WarmStandby, 0., inputs);
    sim.set_backup_solver(Arc::new(|primary: &str| -> Result<BackupPlacement, SolverError> {
        Ok(BackupPlacement {
            backup_name: format!("{}-backup-1", primary),
            host_name: "h0".to_string(),
        })
    }));
    sim.step_until_no_events();

    assert_eq!(sim.backup_pool("web0").unwrap(), vec!["web0-backup-0"]);
    assert_eq!(sim.vm_status("web0-backup-1"), None);
}

#[test]
// Destroying the same VM twice is processed once.
fn test_duplicate_destruction_is_ignored() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0"), ("web0-backup-0", "h1"), ("web0-backup-1", "h1")]),
        host_events: vec![failure("h0", 5.)],
        vm_events: vec![failure("web0", 5.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::WarmStandby, 1., inputs);
    sim.step_until_no_events();

    assert_eq!(sim.vm_status("web0-backup-0"), Some(VmStatus::Active));
    assert_eq!(sim.vm_status("web0-backup-1"), Some(VmStatus::Inactive));
    assert_close(sim.metrics().total_downtime, 1.);
}

#[test]
// The pool exists but its only backup sits on a failed host, so the victim's units are lost.
fn test_warm_standby_without_eligible_backups() {
    let inputs = SimulationInputs {
        placements: placements(&[("web0", "h0"), ("web0-backup-0", "h1")]),
        host_events: vec![failure("h1", 1.)],
        vm_events: vec![failure("web0", 2.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::WarmStandby, 1.43, inputs);
    sim.submit_unit("web0", 1000., 1.5);
    sim.submit_unit("web0", 1000., 1.5);
    sim.step_until_no_events();

    let metrics = sim.metrics();
    assert_eq!(metrics.total_cloudlets_failed, 2);
    assert_eq!(metrics.completed_units, 0);
    assert_eq!(metrics.total_downtime, 0.);
    assert_eq!(sim.vm_status("web0-backup-0"), Some(VmStatus::Inactive));
    assert_eq!(sim.backup_pool("web0").unwrap(), vec!["web0-backup-0"]);
    assert!(sim.active_backup("web0").is_none());
}

#[test]
// Active standby fails with its host, the next backup takes over and the primary maps to it.
// Units addressed to the primary follow both redirects.
fn test_warm_standby_replaces_failed_standby() {
    let inputs = SimulationInputs {
        placements: placements(&[
            ("web0", "h0"),
            ("web0-backup-0", "h1"),
            ("web0-backup-1", "h2"),
        ]),
        host_events: vec![failure("h1", 5.)],
        vm_events: vec![failure("web0", 1.)],
        ..Default::default()
    };
    let mut sim = build(PolicyKind::WarmStandby, 0.5, inputs);
    sim.submit_unit("web0", 1000., 6.);
    sim.step_until_no_events();

    assert_eq!(sim.vm_status("web0-backup-0"), Some(VmStatus::Failed));
    assert_eq!(sim.vm_status("web0-backup-1"), Some(VmStatus::Active));
    assert_eq!(sim.active_backup("web0"), Some("web0-backup-1".to_string()));
    assert_eq!(sim.active_backup("web0-backup-0"), Some("web0-backup-1".to_string()));

    let metrics = sim.metrics();
    assert_eq!(metrics.total_failures, 1);
    assert_close(metrics.total_downtime, 1.);
    assert_eq!(metrics.total_cloudlets_failed, 1);
    assert_eq!(metrics.completed_units, 1);
    let fabric = sim.fabric();
    let fabric = fabric.borrow();
    let web0 = fabric.vm_id("web0").unwrap();
    assert_eq!(fabric.paths.resolve(web0), fabric.vm_id("web0-backup-1").unwrap());
}
