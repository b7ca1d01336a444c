pub mod job;
pub mod queue;
pub mod submit;
pub mod worker;
