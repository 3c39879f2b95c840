//! Skin image analysis service
//!
//! Accepts a skin photo URL, runs it through a vision model, plans product
//! searches, enriches the results with prices and reports the outcome through
//! an asynchronous job API.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
