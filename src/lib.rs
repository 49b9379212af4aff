pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod logging;
pub mod refresh;
pub mod services;
pub mod state;
pub mod trends;
pub mod utils;
pub mod web;
