//! GitProvider against real clones built with libgit2.

use std::sync::Arc;

use gitree_core::provider::{GitProvider, GitProviderFactory};
use gitree_core::{CommitId, Error, Node, ProviderFactory, RepositoryProvider, Root, build_tree};
use gitree_testutil::{CloneDir, FixtureFile};

fn two_commit_clone() -> (CloneDir, git2::Oid, git2::Oid) {
    let clones = CloneDir::new().unwrap();
    let repo = clones.init("demo").unwrap();
    let first = repo
        .commit(
            "first",
            &[
                FixtureFile::file("README.md", ""),
                FixtureFile::file("src/a.txt", "hello world!"),
                FixtureFile::Executable("bin/run.sh", b"#!/bin/sh\n".to_vec()),
                FixtureFile::Symlink("link", "src/a.txt"),
            ],
        )
        .unwrap();
    let second = repo
        .commit(
            "second",
            &[
                FixtureFile::file("README.md", "# demo\n"),
                FixtureFile::file("src/b.txt", "bee"),
            ],
        )
        .unwrap();
    repo.branch("stable", first).unwrap();
    repo.tag("v1.0", first).unwrap();
    repo.annotated_tag("v2.0", second).unwrap();
    (clones, first, second)
}

fn provider(clones: &CloneDir) -> GitProvider {
    GitProvider::open(clones.path().join("demo")).unwrap()
}

#[test]
fn resolves_every_revision_form() {
    let (clones, first, second) = two_commit_clone();
    let provider = provider(&clones);
    let first_hex = first.to_string();

    assert_eq!(provider.resolve(&first_hex).unwrap().as_str(), first_hex);
    assert_eq!(provider.resolve(&first_hex[..7]).unwrap().as_str(), first_hex);
    assert_eq!(provider.resolve("stable").unwrap().as_str(), first_hex);
    assert_eq!(provider.resolve("v1.0").unwrap().as_str(), first_hex);
    assert_eq!(provider.resolve("v2.0").unwrap().as_str(), second.to_string());
    assert_eq!(provider.resolve("HEAD").unwrap().as_str(), second.to_string());
}

#[test]
fn unknown_revision_is_invalid() {
    let (clones, _, _) = two_commit_clone();
    let provider = provider(&clones);
    for rev in ["nope", "0000000000000000000000000000000000000000"] {
        assert!(
            matches!(provider.resolve(rev), Err(Error::InvalidRevision(_))),
            "{rev}"
        );
    }
}

#[test]
fn listing_keeps_regular_files_only() {
    let (clones, first, _) = two_commit_clone();
    let provider = provider(&clones);
    let listing = provider.list_tree(&CommitId::new(first.to_string())).unwrap();

    let mut paths: Vec<_> = listing
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.size))
        .collect();
    paths.sort_unstable();
    assert_eq!(
        paths,
        [("README.md", 0), ("bin/run.sh", 10), ("src/a.txt", 12)]
    );
}

#[test]
fn short_and_full_sha_give_the_same_tree() {
    let (clones, first, _) = two_commit_clone();
    let provider = provider(&clones);
    let full = provider.resolve(&first.to_string()).unwrap();
    let short = provider.resolve(&first.to_string()[..7]).unwrap();

    let full_tree = build_tree(&provider.list_tree(&full).unwrap()).unwrap();
    let short_tree = build_tree(&provider.list_tree(&short).unwrap()).unwrap();
    assert_eq!(full_tree, short_tree);
}

#[test]
fn resolution_is_idempotent() {
    let (clones, _, _) = two_commit_clone();
    let provider = provider(&clones);
    let once = provider.resolve("stable").unwrap();
    let twice = provider.resolve("stable").unwrap();
    assert_eq!(once, twice);
    assert_eq!(
        provider.list_tree(&once).unwrap(),
        provider.list_tree(&twice).unwrap()
    );
    assert_eq!(
        provider.file_contents(&once, "src/a.txt").unwrap(),
        provider.file_contents(&twice, "src/a.txt").unwrap()
    );
}

#[test]
fn file_contents_by_path() {
    let (clones, first, second) = two_commit_clone();
    let provider = provider(&clones);
    let first = CommitId::new(first.to_string());
    let second = CommitId::new(second.to_string());

    assert_eq!(provider.file_contents(&first, "src/a.txt").unwrap(), b"hello world!");
    assert_eq!(provider.file_contents(&second, "README.md").unwrap(), b"# demo\n");
    assert!(matches!(
        provider.file_contents(&second, "src/a.txt"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn every_file_reads_back_its_listed_size() {
    let (clones, _, _) = two_commit_clone();
    let factory = Arc::new(GitProviderFactory);
    let root = Arc::new(Root::new(clones.path(), factory));

    for rev in ["stable", "HEAD"] {
        let commitish = root.repository("demo").unwrap().commitish(rev).unwrap();
        let tree = commitish.tree().unwrap();
        let mut pending = vec![(String::new(), tree)];
        while let Some((base, dir)) = pending.pop() {
            for (name, entry) in dir.sorted_children() {
                let path = if base.is_empty() {
                    name.to_string()
                } else {
                    format!("{base}/{name}")
                };
                if entry.is_dir() {
                    pending.push((path, Arc::clone(entry)));
                } else {
                    let bytes = commitish.read_file(&path).unwrap();
                    assert_eq!(bytes.len() as u64, entry.size(), "{rev}:{path}");
                }
            }
        }
    }
}

#[test]
fn factory_and_node_graph_over_clones() {
    let (clones, _, _) = two_commit_clone();
    let root = Arc::new(Root::new(clones.path(), Arc::new(GitProviderFactory)));

    let src = Node::Root(Arc::clone(&root))
        .child("demo")
        .and_then(|n| n.child("v1.0"))
        .and_then(|n| n.child("src"))
        .unwrap();
    let names: Vec<_> = src.children().unwrap().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["a.txt"]);

    assert!(matches!(root.repository("ghost"), Err(Error::NotFound(_))));
    assert!(GitProviderFactory.open("demo", &clones.path().join("demo")).is_ok());
}
