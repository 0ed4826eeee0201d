//! Atmos - Air-quality trend analysis and alerting service.
//!
//! # Overview
//!
//! Atmos periodically ingests short-term pollutant forecasts (PM2.5, NO2, O3,
//! CO) plus relative humidity for one tracked location, fits a linear trend
//! to each series, and estimates how long until a pollutant crosses its
//! health-based safety limit.
//!
//! The result is published as an immutable [`model::Snapshot`]: an alert
//! level driven by the soonest projected breach, a composite air-quality
//! index, and four household recommendations.
//!
//! # Readings Sources
//!
//! - Meteomatics forecast API (default)
//! - A serial sensor board streaming JSON lines, which also receives the
//!   recommendations back after each cycle
//!
//! # Modules
//!
//! - [`model`]: Pollutants, samples, forecasts, snapshots and locations
//! - [`trend`]: Least-squares trend estimation
//! - [`forecast`]: Trend classification and time-to-breach projection
//! - [`alert`]: Alert level selection
//! - [`aqi`]: Composite air-quality index
//! - [`recommendation`]: Household recommendations
//! - [`aggregation`]: Snapshot assembly
//! - [`engine`]: Update cycles, current snapshot and location
//! - [`storage`]: SQLite persistence of readings and location
//! - [`data_sources`]: Upstream clients and the traits they implement
//! - [`config`]: Environment configuration
//! - [`api`]: HTTP API handlers

pub mod aggregation;
pub mod alert;
pub mod api;
pub mod aqi;
pub mod config;
pub mod data_sources;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod model;
pub mod recommendation;
pub mod storage;
pub mod trend;
