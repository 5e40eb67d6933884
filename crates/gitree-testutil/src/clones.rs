//! On-disk git clones for provider and end-to-end tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use git2::{Commit, IndexAddOption, Oid, Repository, Signature};
use tempfile::TempDir;

/// A temp directory playing the role of the clones directory.
#[derive(Debug)]
pub struct CloneDir {
    dir: TempDir,
}

impl CloneDir {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `git init` a non-bare repository called `name`.
    pub fn init(&self, name: &str) -> Result<RepoBuilder, git2::Error> {
        let workdir = self.dir.path().join(name);
        let repo = Repository::init(&workdir)?;
        Ok(RepoBuilder { repo, workdir })
    }
}

/// One entry of a fixture commit.
#[derive(Debug, Clone)]
pub enum FixtureFile {
    File(&'static str, Vec<u8>),
    Executable(&'static str, Vec<u8>),
    Symlink(&'static str, &'static str),
}

impl FixtureFile {
    pub fn file(path: &'static str, contents: impl Into<Vec<u8>>) -> Self {
        FixtureFile::File(path, contents.into())
    }

    fn path(&self) -> &'static str {
        match self {
            FixtureFile::File(path, _)
            | FixtureFile::Executable(path, _)
            | FixtureFile::Symlink(path, _) => path,
        }
    }
}

/// Writes commits into one fixture repository.
pub struct RepoBuilder {
    repo: Repository,
    workdir: PathBuf,
}

impl std::fmt::Debug for RepoBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoBuilder")
            .field("workdir", &self.workdir)
            .finish()
    }
}

impl RepoBuilder {
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Commit exactly `files` on top of `HEAD`; the new tree contains
    /// nothing else.
    pub fn commit(&self, message: &str, files: &[FixtureFile]) -> Result<Oid, git2::Error> {
        self.clear_workdir().map_err(io_error)?;
        for file in files {
            self.write(file).map_err(io_error)?;
        }

        let mut index = self.repo.index()?;
        index.clear()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;

        let signature = Signature::now("gitree fixtures", "fixtures@gitree.invalid")?;
        let parent = self.head_commit()?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        self.repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
    }

    pub fn branch(&self, name: &str, target: Oid) -> Result<(), git2::Error> {
        let commit = self.repo.find_commit(target)?;
        self.repo.branch(name, &commit, true)?;
        Ok(())
    }

    pub fn tag(&self, name: &str, target: Oid) -> Result<(), git2::Error> {
        let object = self.repo.find_object(target, None)?;
        self.repo.tag_lightweight(name, &object, true)?;
        Ok(())
    }

    /// Annotated tag, which has to be peeled to reach the commit.
    pub fn annotated_tag(&self, name: &str, target: Oid) -> Result<(), git2::Error> {
        let object = self.repo.find_object(target, None)?;
        let signature = Signature::now("gitree fixtures", "fixtures@gitree.invalid")?;
        self.repo.tag(name, &object, &signature, name, true)?;
        Ok(())
    }

    fn head_commit(&self) -> Result<Option<Commit<'_>>, git2::Error> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(None),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn clear_workdir(&self) -> std::io::Result<()> {
        for entry in fs::read_dir(&self.workdir)? {
            let entry = entry?;
            if entry.file_name() == ".git" {
                continue;
            }
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(path)?;
            } else {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn write(&self, file: &FixtureFile) -> std::io::Result<()> {
        let path = self.workdir.join(file.path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match file {
            FixtureFile::File(_, contents) => fs::write(&path, contents),
            FixtureFile::Executable(_, contents) => {
                fs::write(&path, contents)?;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            }
            FixtureFile::Symlink(_, target) => std::os::unix::fs::symlink(target, &path),
        }
    }
}

fn io_error(e: std::io::Error) -> git2::Error {
    git2::Error::from_str(&e.to_string())
}
