pub mod domain_state;
pub mod scheduler;

pub use domain_state::DomainStateMap;
pub use scheduler::Scheduler;
