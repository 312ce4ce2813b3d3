//! Feature subsystems built on the generic trackable pipeline.

pub mod anchor;
pub mod image;
pub mod layer;
pub mod marker;
pub mod plane;
pub mod raycast;
