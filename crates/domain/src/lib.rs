pub mod appenv;
pub mod artifact;

pub use appenv::{AppEnv, Variant};
pub use artifact::{ArtifactKind, ResolvedArtifact};
