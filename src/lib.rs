//! Background engine for a browser habit tracker. It follows which sites get the user's
//! attention, keeps active and idle time apart, and periodically uploads a summary of the
//! session to a remote service.
//!

pub mod cli;
pub mod daemon;
pub mod sync;
pub mod tracker;
pub mod utils;
