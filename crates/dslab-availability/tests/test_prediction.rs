use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dslab_core::simulation::Simulation;

use dslab_availability::core::config::SimulationConfig;
use dslab_availability::core::fabric::HostId;
use dslab_availability::core::placement::PlacementTable;
use dslab_availability::error::PredictorError;
use dslab_availability::extensions::failure_predictor::{HostFeatures, HostPredictor};
use dslab_availability::simulation::{AvailabilitySimulation, SimulationInputs};

// Predicts failure of hosts on platform "b".
struct PlatformPredictor;

impl HostPredictor for PlatformPredictor {
    fn predict(&self, hosts: &[HostFeatures]) -> Result<Vec<(HostId, bool)>, PredictorError> {
        Ok(hosts
            .iter()
            .map(|host| (host.host_id, host.platform_id == "b"))
            .collect())
    }
}

struct BrokenPredictor;

impl HostPredictor for BrokenPredictor {
    fn predict(&self, _hosts: &[HostFeatures]) -> Result<Vec<(HostId, bool)>, PredictorError> {
        Err(PredictorError::ExitStatus("exit status: 1".to_string()))
    }
}

fn build(predictor: Arc<dyn HostPredictor>) -> AvailabilitySimulation {
    let mut placements = PlacementTable::new();
    placements.insert("web0", "a0");
    placements.insert("db0", "b0");
    let inputs = SimulationInputs {
        placements,
        ..Default::default()
    };
    let mut cloud_sim = AvailabilitySimulation::with_inputs(Simulation::new(), SimulationConfig::default(), inputs);
    cloud_sim.set_host_predictor(predictor);
    cloud_sim
}

// Predictions arrive from a worker thread, so the simulation is advanced in small steps
// until the predictor has answered for every host.
fn step_until_predicted(cloud_sim: &mut AvailabilitySimulation, hosts: &[&str]) {
    for _ in 0..1000 {
        cloud_sim.step_for_duration(1.);
        if hosts.iter().all(|host| cloud_sim.host_prediction(host).is_some()) {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("no predictions received");
}

#[test]
// Hosts are predicted every 10 s, a host newly predicted to fail is reported once.
fn test_failure_is_predicted_once() {
    let mut cloud_sim = build(Arc::new(PlatformPredictor));
    step_until_predicted(&mut cloud_sim, &["a0", "b0"]);
    assert!(cloud_sim.current_time() >= 10.);
    assert_eq!(cloud_sim.host_prediction("a0"), Some(false));
    assert_eq!(cloud_sim.host_prediction("b0"), Some(true));
    assert_eq!(cloud_sim.metrics().predicted_failures, 1);

    cloud_sim.step_for_duration(50.);
    assert_eq!(cloud_sim.metrics().predicted_failures, 1);
}

#[test]
// Predictor errors mark the whole batch as not failing.
fn test_predictor_error() {
    let mut cloud_sim = build(Arc::new(BrokenPredictor));
    step_until_predicted(&mut cloud_sim, &["a0", "b0"]);
    assert_eq!(cloud_sim.host_prediction("a0"), Some(false));
    assert_eq!(cloud_sim.host_prediction("b0"), Some(false));
    assert_eq!(cloud_sim.metrics().predicted_failures, 0);
}
