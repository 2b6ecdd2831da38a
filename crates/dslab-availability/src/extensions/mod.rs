pub mod failure_predictor;
pub mod workload_reader;
