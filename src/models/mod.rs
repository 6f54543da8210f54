pub mod config;
pub mod detection;
pub mod frame;
pub mod label;
pub mod roi;
pub mod session;
