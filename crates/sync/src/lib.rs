pub mod classifier;
pub mod error;
pub mod fund;
pub mod history;
pub mod master;
pub mod planner;
pub mod runner;
