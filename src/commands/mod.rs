pub mod config;
pub mod deploy;
pub mod detect;
pub mod doctor;
