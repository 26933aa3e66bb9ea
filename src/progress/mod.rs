//! Progress display for the command-line front end
//!
//! Renders [`crate::xfer::XferProgressInfo`] reports as terminal progress
//! bars with throughput and ETA.

mod reporter;

pub use reporter::*;
