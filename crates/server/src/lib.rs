//! HTTP front end of the predictor tables

pub mod api;
pub mod config;
