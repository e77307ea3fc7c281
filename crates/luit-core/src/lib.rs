//! Core types, engines and boundary traits for the Luit water-contamination
//! tracker.
//!
//! This crate is free of HTTP and database dependencies. Storage, role
//! resolution, time and the PIN directory are all supplied by the embedder
//! through the traits in [`store`], [`role`], [`clock`] and [`locality`].

// Native `async fn` in traits; the returned futures are declared `Send`
// explicitly on the trait side.
#![allow(async_fn_in_trait)]

pub mod aggregation;
pub mod assignment;
pub mod clock;
pub mod config;
pub mod error;
pub mod geo;
pub mod lifecycle;
pub mod listings;
pub mod locality;
pub mod memory;
pub mod proximity;
pub mod report;
pub mod role;
pub mod store;
pub mod tracker;

pub use error::{Error, Result};
pub use tracker::Tracker;

#[cfg(test)]
mod tests;
