use dslab_core::simulation::Simulation;

use dslab_availability::core::config::{PolicyKind, SimulationConfig};
use dslab_availability::core::fabric::VmStatus;
use dslab_availability::core::placement::PlacementTable;
use dslab_availability::core::trace::{TraceEvent, TraceEventKind};
use dslab_availability::error::{Error, TraceError};
use dslab_availability::extensions::workload_reader::WorkloadRequest;
use dslab_availability::simulation::{AvailabilitySimulation, SimulationInputs};

fn name_wrapper(file_name: &str) -> String {
    format!("test-configs/{}", file_name)
}

fn vm_failure(node: &str, timestamp: f64) -> TraceEvent {
    TraceEvent {
        timestamp,
        node_id: node.to_string(),
        kind: TraceEventKind::Failure,
    }
}

#[test]
// VM trace contains db0 twice, a backup, an unknown VM and a recovery event.
// Only the first db0 failure is scheduled. Restored backups return to standby.
// Host h9 has no placed VMs, so its events are filtered out on load.
//
// Timeline (no recovery delay):
// t=1   unit of 1 s on web0
// t=10  h0 fails, web0 destroyed
// t=12  unit of 2 s on failed web0 is buffered and counted as failed
// t=13  transmission of 1000 bytes at 8000 bit/s = 1 s of transmission delay
// t=15  h0 recovers, web0 restored after 5 s of downtime, buffered unit resubmitted
// t=20  h2 fails, db0-backup-0 destroyed
// t=30  h2 recovers, db0-backup-0 restored after 10 s of downtime
// t=40  db0 destroyed by the VM trace and never restored
//
// Processing delay = 1 + 2 (nominal) + 5 (downtime of the resubmitted unit) = 8.
fn test_run_from_config() {
    let sim_config = SimulationConfig::from_file(&name_wrapper("config.yaml")).unwrap();
    assert_eq!(sim_config.policy, PolicyKind::ColdRestart);
    let mut cloud_sim = AvailabilitySimulation::new(Simulation::new(), sim_config).unwrap();

    let report = cloud_sim.run();

    assert_eq!(cloud_sim.current_time(), 100.);
    assert_eq!(cloud_sim.scheduled_vm_failures(), 1);
    assert_eq!(cloud_sim.vm_status("web0"), Some(VmStatus::Active));
    assert_eq!(cloud_sim.vm_status("db0-backup-0"), Some(VmStatus::Inactive));
    assert_eq!(cloud_sim.vm_status("db0"), Some(VmStatus::Failed));
    assert_eq!(cloud_sim.vm_status("web0-backup-0"), Some(VmStatus::Inactive));

    assert_eq!(report.total_failures, 2);
    assert_eq!(report.total_downtime, 15.);
    assert_eq!(report.availability, 85.);
    assert_eq!(report.total_cloudlets_failed, 1);
    assert_eq!(report.completed_units, 2);
    assert!((report.total_processing_delay - 8.).abs() < 1e-9);
    assert!((report.total_transmission_delay - 1.).abs() < 1e-9);
    assert!((report.total_delay - 9.).abs() < 1e-9);
}

#[test]
fn test_missing_trace_file() {
    let mut sim_config = SimulationConfig::from_file(&name_wrapper("config.yaml")).unwrap();
    sim_config.host_trace = Some(name_wrapper("no_such_trace.csv"));
    let result = AvailabilitySimulation::new(Simulation::new(), sim_config);
    assert!(matches!(result, Err(Error::Trace(TraceError::Io { .. }))));
}

#[test]
fn test_inputs_without_host_filter() {
    let mut sim_config = SimulationConfig::from_file(&name_wrapper("config.yaml")).unwrap();
    sim_config.filter_host_trace = false;
    let inputs = SimulationInputs::load(&sim_config).unwrap();
    assert_eq!(inputs.host_events.len(), 5);
    assert_eq!(inputs.vm_events.len(), 5);
    assert_eq!(inputs.workload.len(), 3);

    sim_config.filter_host_trace = true;
    let inputs = SimulationInputs::load(&sim_config).unwrap();
    assert_eq!(inputs.host_events.len(), 4);
}

#[test]
// Number of scheduled failures never exceeds the number of VMs.
fn test_injection_is_capped_by_vm_count() {
    let mut placements = PlacementTable::new();
    placements.insert("web0", "h0");
    placements.insert("web1", "h0");
    let inputs = SimulationInputs {
        placements,
        vm_events: vec![
            vm_failure("web0", 1.),
            vm_failure("web0", 2.),
            vm_failure("web1", 3.),
            vm_failure("web2", 4.),
        ],
        ..Default::default()
    };
    let mut cloud_sim = AvailabilitySimulation::with_inputs(
        Simulation::new(),
        SimulationConfig::default().with_policy(PolicyKind::NoRecovery),
        inputs,
    );
    cloud_sim.step_until_no_events();

    assert_eq!(cloud_sim.scheduled_vm_failures(), 2);
    assert_eq!(cloud_sim.vm_status("web0"), Some(VmStatus::Failed));
    assert_eq!(cloud_sim.vm_status("web1"), Some(VmStatus::Failed));
    assert_eq!(cloud_sim.current_time(), 3.);
}

#[test]
// Backups are never targeted, events at negative times are skipped.
fn test_injection_skips_backups() {
    let mut placements = PlacementTable::new();
    placements.insert("web0", "h0");
    placements.insert("web0-backup-0", "h1");
    placements.insert("db0", "h1");
    let inputs = SimulationInputs {
        placements,
        vm_events: vec![vm_failure("web0-backup-0", 1.), vm_failure("db0", -1.)],
        ..Default::default()
    };
    let mut cloud_sim = AvailabilitySimulation::with_inputs(
        Simulation::new(),
        SimulationConfig::default().with_policy(PolicyKind::WarmStandby),
        inputs,
    );
    cloud_sim.step_until_no_events();

    assert_eq!(cloud_sim.scheduled_vm_failures(), 0);
    assert_eq!(cloud_sim.vm_status("web0-backup-0"), Some(VmStatus::Inactive));
    assert_eq!(cloud_sim.vm_status("db0"), Some(VmStatus::Active));
}

#[test]
// Work scheduled at negative or non-finite times is skipped instead of being emitted.
fn test_workload_at_invalid_time_is_skipped() {
    let mut placements = PlacementTable::new();
    placements.insert("web0", "h0");
    let process = |time: f64| WorkloadRequest::Process {
        time,
        vm: "web0".to_string(),
        length: 1000.,
    };
    let inputs = SimulationInputs {
        placements,
        workload: vec![process(-1.), process(f64::NAN), process(2.)],
        ..Default::default()
    };
    let mut cloud_sim = AvailabilitySimulation::with_inputs(
        Simulation::new(),
        SimulationConfig::default().with_policy(PolicyKind::NoRecovery),
        inputs,
    );
    assert!(!cloud_sim.submit_unit("web0", 1000., -0.5));
    assert!(!cloud_sim.submit_unit("web0", 1000., f64::INFINITY));
    assert!(cloud_sim.submit_unit("web0", 1000., 0.));
    cloud_sim.step_until_no_events();

    assert_eq!(cloud_sim.metrics().completed_units, 2);
    assert_eq!(cloud_sim.current_time(), 3.);
}
