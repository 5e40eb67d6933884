//! The `demo` scenario.
//!
//! ```text
//! /demo/abc1234/           (also reachable as main, v1.0 and the full SHA)
//! ├── README.md            0 bytes
//! └── src/
//!     └── a.txt            12 bytes: "hello world!"
//! ```

use std::sync::Arc;

use gitree_core::{MemoryProvider, MemoryProviderFactory, Root};

pub const DEMO_REPOSITORY: &str = "demo";
pub const DEMO_COMMIT: &str = "abc1234f5e6d7c8b9a0abc1234f5e6d7c8b9a0ab";
/// Abbreviated form of [`DEMO_COMMIT`].
pub const DEMO_SHORT: &str = "abc1234";
pub const DEMO_FILE_CONTENTS: &[u8] = b"hello world!";

/// The demo repository behind a fresh [`Root`].
#[derive(Debug, Clone)]
pub struct DemoScenario {
    pub root: Arc<Root>,
    pub provider: Arc<MemoryProvider>,
    pub factory: Arc<MemoryProviderFactory>,
}

impl DemoScenario {
    pub fn new() -> Self {
        let provider = Arc::new(MemoryProvider::new());
        provider.add_commit(
            DEMO_COMMIT,
            [("src/a.txt", DEMO_FILE_CONTENTS), ("README.md", &b""[..])],
        );
        provider.set_ref("main", DEMO_COMMIT);
        provider.set_ref("v1.0", DEMO_COMMIT);

        let factory = Arc::new(MemoryProviderFactory::new());
        factory.insert(DEMO_REPOSITORY, Arc::clone(&provider));
        let root = Arc::new(Root::new("/clones", factory.clone()));
        Self {
            root,
            provider,
            factory,
        }
    }

    /// Add another commit to the demo repository.
    pub fn add_commit(&self, id: &str, files: &[(&str, &[u8])]) {
        self.provider
            .add_commit(id, files.iter().map(|(path, bytes)| (*path, bytes.to_vec())));
    }
}

impl Default for DemoScenario {
    fn default() -> Self {
        Self::new()
    }
}
