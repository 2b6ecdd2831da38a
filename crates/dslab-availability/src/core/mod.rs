pub mod config;
pub mod datacenter;
pub mod events;
pub mod external;
pub mod fabric;
pub mod injector;
pub mod metrics;
pub mod placement;
pub mod provisioner;
pub mod recovery_policies;
pub mod recovery_policy;
pub mod trace;
