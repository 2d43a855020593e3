pub mod worker;
pub mod workload;
