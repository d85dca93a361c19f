//! omnipcx-proxy: protocol gateway between the OmniPCX Office Link Driver
//! (PBX side) and the Opera property-management system (Hotel side).
//!
//! Messages are pumped in both directions, blank voice mail passwords are
//! filled in on check-in, and call detail records are copied to a collector.
//! CDRs that cannot be delivered are held in [`cdr_buffer::CdrBuffer`] and
//! persisted across restarts.

pub mod cdr_buffer;
pub mod config;
pub mod database;
pub mod detector;
pub mod link;
pub mod logging;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;
