//! Session module for the BBS server
//!
//! Maps opaque session tokens to authenticated backend instances.

mod registry;

pub use registry::{Session, SessionRegistry};
