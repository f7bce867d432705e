//! Discovery of running SAMP hubs through their lock files

pub mod lockfile;

pub use lockfile::{LockLocation, LockfileLocator, SAMP_HUB_ENV};
