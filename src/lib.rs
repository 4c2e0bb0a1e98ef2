//! Tracks which media assets each content item uses.
//!
//! Two independent sources feed one association store: the stored body of
//! each item ([`sync`]) and its rendered public page ([`crawler`]).
//! [`aggregate`] merges those with the deep-search cache to answer "where is
//! this asset used".

pub mod aggregate;
pub mod config;
pub mod crawler;
pub mod db;
pub mod deep_search;
pub mod export;
pub mod extract;
pub mod host;
pub mod logging;
pub mod resolver;
pub mod schedule;
pub mod sync;
