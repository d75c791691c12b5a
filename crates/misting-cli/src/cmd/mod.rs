pub mod audit;
pub mod config;
pub mod provision;
pub mod serve;
pub mod status;
