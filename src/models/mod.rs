pub mod application;
pub mod approval_number;
pub mod consent;
pub mod gate_schedule;
pub mod policy;
pub mod settings;
pub mod stats;
pub mod student;
pub mod student_csv;
