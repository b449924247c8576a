pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::SyncOrchestrator;
pub use scheduler::run_periodic;
