#[macro_use]
extern crate rocket;

pub mod api;
pub mod background;
pub mod bootstrap;
pub mod common;
pub mod config;
pub mod context;
pub mod provision;
pub mod storage;
pub mod utils;
