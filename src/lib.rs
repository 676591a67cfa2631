pub mod cli;
pub mod config;
pub mod export;
pub mod record;
pub mod report;
pub mod storage;
