//! Component identifiers.

/// Identifier of a simulation component, assigned at registration.
pub type Id = u32;
