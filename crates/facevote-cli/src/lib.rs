pub mod cli;
pub mod commands;
pub mod config;
pub mod doctor;
pub mod errors;
pub mod faces;
pub mod output;
pub mod runtime;
