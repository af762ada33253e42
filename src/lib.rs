//! Client-side data layer of a recruiting platform: a TTL query cache,
//! realtime subscriptions, cached-query façades with pagination, list
//! windowing and feed ranking.

pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod demo;
pub mod error;
pub mod infra;
pub mod query;
pub mod ranking;
pub mod realtime;
pub mod window;

pub use talentgrid_types as types;
