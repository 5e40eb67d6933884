//! Test fixtures for gitree.
//!
//! - [`demo`]: the `demo` repository on the in-memory provider, no disk
//! - [`clones`]: real git clones built with libgit2 in a temp directory

pub mod clones;
pub mod demo;

pub use clones::{CloneDir, FixtureFile, RepoBuilder};
pub use demo::{DEMO_COMMIT, DEMO_FILE_CONTENTS, DEMO_REPOSITORY, DEMO_SHORT, DemoScenario};
