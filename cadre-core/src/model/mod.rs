//! Typed artifacts exchanged between workers, crews, and the flow
//!
//! Every task declares an expected artifact kind; worker output is coerced
//! into one of these shapes before guardrails run.

pub mod architecture;
pub mod artifact;
pub mod requirements;
pub mod testing;

pub use architecture::{
    Architecture, Component, DecisionRecord, InterfaceContract, TechnologyChoice,
};
pub use artifact::{ArtifactKind, CodeFile, DeploymentBundle, FileKind, TaskArtifact};
pub use requirements::{
    AcceptanceCriterion, NonFunctionalRequirement, Priority, Requirements, UserStory,
};
pub use testing::{FileCoverage, TestFeedback, TestRun};
