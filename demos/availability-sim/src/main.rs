use std::process;
use std::time::Instant;

use clap::Parser;

use dslab_availability::core::config::{PolicyKind, SimulationConfig};
use dslab_availability::simulation::AvailabilitySimulation;
use dslab_core::simulation::Simulation;

fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to simulation config.
    #[clap(short, long)]
    config: String,

    /// Recovery policy overriding the config: no_recovery, cold_restart or warm_standby.
    #[clap(short, long)]
    policy: Option<PolicyKind>,

    /// Print the final metrics as JSON.
    #[clap(long)]
    json: bool,
}

fn main() {
    init_logger();

    let args = Args::parse();
    let simulation_start = Instant::now();

    let mut sim_config = match SimulationConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    if let Some(policy) = args.policy {
        sim_config = sim_config.with_policy(policy);
    }

    let mut availability_sim = match AvailabilitySimulation::new(Simulation::new(), sim_config) {
        Ok(sim) => sim,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    let report = availability_sim.run();

    if args.json {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(err) => eprintln!("{}", err),
        }
    } else {
        println!("{}", report);
    }

    println!("Simulation process time {:.2?}", simulation_start.elapsed());
}
