pub mod assignment;
pub mod queue;
pub mod selection;
