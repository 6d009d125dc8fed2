pub mod context;
pub mod core;
pub mod providers;
pub mod scheduler;
