//! Monte Carlo market-risk simulator.
//!
//! The [`risk`] module is the pure engine: it turns a closing-price series into
//! VaR95, VaR99 and ES95 via GBM path simulation. The remaining modules wire it
//! to a market-data feed, SQLite storage and an HTTP/WebSocket API.

pub mod config;
pub mod db;
pub mod errors;
pub mod feeds;
pub mod pipeline;
pub mod risk;
pub mod server;
pub mod state;
