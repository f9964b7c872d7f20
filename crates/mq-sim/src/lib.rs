pub mod analytics;
pub mod config;
pub mod report;
pub mod supervisor;
pub mod worker;
