//! Simulation events.

// FAILURE EVENTS //////////////////////////////////////////////////////////////////////////////////

pub mod failure {
    use serde::Serialize;

    /// Host goes down.
    #[derive(Serialize)]
    pub struct HostFailure {
        pub host_id: u32,
    }

    /// Host is back up.
    #[derive(Serialize)]
    pub struct HostRecovery {
        pub host_id: u32,
    }

    /// VM is destroyed, either by a cascading host failure or by the VM failure trace.
    #[derive(Serialize)]
    pub struct VmFailure {
        pub vm_id: u32,
    }

    /// Failed VM is reallocated on the host it was running on.
    #[derive(Serialize)]
    pub struct VmRestore {
        pub vm_id: u32,
        pub host_id: u32,
    }

    /// All VMs of the application are deployed.
    #[derive(Serialize)]
    pub struct DeploymentCompleted {}
}

// WORKLOAD EVENTS /////////////////////////////////////////////////////////////////////////////////

pub mod workload {
    use serde::Serialize;

    /// New unit of work addressed to a VM.
    #[derive(Serialize)]
    pub struct UnitSubmitted {
        pub vm_id: u32,
        pub length: f64,
    }

    #[derive(Serialize)]
    pub struct UnitFinished {
        pub vm_id: u32,
        pub attempt: u64,
    }

    /// Data transfer between two VMs.
    #[derive(Serialize)]
    pub struct TransmissionSubmitted {
        pub src_vm: u32,
        pub dst_vm: u32,
        pub size: f64,
        pub bandwidth: f64,
    }
}

// BACKUP PROVISIONING EVENTS //////////////////////////////////////////////////////////////////////

pub mod backup {
    use serde::Serialize;

    #[derive(Serialize)]
    pub struct BackupPlacementRequest {
        pub primary: String,
    }

    #[derive(Serialize)]
    pub struct BackupPlacementSucceeded {
        pub primary: String,
        pub backup_name: String,
        pub host_name: String,
    }

    #[derive(Serialize)]
    pub struct BackupPlacementFailed {
        pub primary: String,
        pub reason: String,
    }

    #[derive(Serialize)]
    pub struct PollSolverReplies {}
}

// PREDICTION EVENTS ///////////////////////////////////////////////////////////////////////////////

pub mod prediction {
    use serde::Serialize;

    /// Predictor expects the host to fail soon.
    #[derive(Serialize)]
    pub struct FailurePredicted {
        pub host_id: u32,
    }

    #[derive(Serialize)]
    pub struct PredictBatch {}

    #[derive(Serialize)]
    pub struct PollPredictions {}
}
