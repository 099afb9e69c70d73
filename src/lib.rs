//! Shutter probe library surface.
//!
//! The probe submits threshold-encrypted test transactions tied to trigger blocks, follows
//! each one through sequencing and inclusion, reclaims nonces of probes that go stale, and
//! reports delays, failure rates and blame for the blocks that should have included them.

pub mod account;
pub mod chain;
pub mod error;
pub mod probe;
pub mod runtime;
pub mod shutter;
pub mod stats;
pub mod utils;
