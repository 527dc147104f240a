pub mod orchestrator;
pub mod task;
pub mod worker;
