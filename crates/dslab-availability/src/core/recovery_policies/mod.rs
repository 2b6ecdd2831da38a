pub mod cold_restart;
pub mod no_recovery;
pub mod warm_standby;
