//! prom2statsd - Prometheus to DogStatsD bridge library.
//!
//! Scrapes a text exposition endpoint on a fixed interval and forwards every
//! sample as DogStatsD counts and gauges:
//! - `source` - snapshot sources (HTTP scraper, exposition parser)
//! - `converter` - snapshot to emission events, with `filter` and `delta`
//! - `sink` - event destinations (DogStatsD over UDP)
//! - `scheduler` - poll loop, stop signal and drain handshake
//! - `config` - validated runtime configuration

pub mod config;
pub mod converter;
pub mod delta;
pub mod event;
pub mod filter;
pub mod model;
pub mod scheduler;
pub mod sink;
pub mod source;
