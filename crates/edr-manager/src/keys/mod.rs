//! Key management for the token issuer

mod registry;

pub use registry::ParticipantKeyRegistry;
