pub mod attendance;
pub mod backup;
pub mod catalog;
pub mod core;
pub mod enrollment;
pub mod grading;
pub mod students;
