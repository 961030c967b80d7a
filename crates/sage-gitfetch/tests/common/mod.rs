//! Local upstream repository used as a `file://` remote.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

pub struct Upstream {
    _dir: TempDir,
    pub url: String,
}

impl Upstream {
    /// `main` with tags `v1.0.0` and `v1.1.0`, plus a `feature` branch one
    /// commit ahead of `v1.1.0`.
    pub fn create() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        git(root, &["init", "-q"]);
        git(root, &["checkout", "-q", "-b", "main"]);

        write(root, "lib.rs", "pub fn connect(host: &str) {}\n");
        commit(root, "initial");
        git(root, &["tag", "v1.0.0"]);

        write(
            root,
            "lib.rs",
            "pub fn connect(host: &str, port: u16) {}\n",
        );
        commit(root, "add port parameter");
        git(root, &["tag", "v1.1.0"]);

        git(root, &["checkout", "-q", "-b", "feature"]);
        write(root, "extra.rs", "pub fn retry() {}\n");
        commit(root, "add retry");
        git(root, &["checkout", "-q", "main"]);

        let url = format!("file://{}", root.display());
        Self { _dir: dir, url }
    }
}

fn write(root: &Path, name: &str, content: &str) {
    std::fs::write(root.join(name), content).unwrap();
}

fn commit(root: &Path, message: &str) {
    git(root, &["add", "-A"]);
    git(root, &["commit", "-q", "-m", message]);
}

fn git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
        .args(args)
        .current_dir(root)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}
