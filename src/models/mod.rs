pub mod execution;
pub mod job;
pub mod pipeline;
pub mod stack;
