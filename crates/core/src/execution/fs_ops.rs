//! In-process filesystem steps

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::execution::command::FsOp;

/// Apply a filesystem step. Relative paths are resolved against `root`.
/// The error carries the path that failed.
pub fn apply(op: &FsOp, root: &Path) -> Result<(), (PathBuf, io::Error)> {
    match op {
        FsOp::CreateDir { path } => {
            let path = root.join(path);
            fs::create_dir_all(&path).map_err(|e| (path, e))
        }
        FsOp::Remove { path } => remove(&root.join(path)),
        FsOp::CopyTree { from, to, exclude } => {
            let excludes = build_exclude_set(exclude).map_err(|e| (from.clone(), e))?;
            copy_tree(&root.join(from), &root.join(to), &excludes)
        }
        FsOp::CopyFile { from, to } => {
            let from = root.join(from);
            let to = root.join(to);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|e| (parent.to_path_buf(), e))?;
            }
            // A directory destination receives the file under its own name
            let target = match (to.is_dir(), from.file_name()) {
                (true, Some(name)) => to.join(name),
                _ => to,
            };
            fs::copy(&from, &target).map(|_| ()).map_err(|e| (from, e))
        }
    }
}

fn remove(path: &Path) -> Result<(), (PathBuf, io::Error)> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(|e| (path.to_path_buf(), e))
}

/// Excludes match paths relative to the copy source; `*` stays within one
/// path component, so `*.mjml` only names files at the top level
fn build_exclude_set(patterns: &[String]) -> io::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
}

/// Copy `from` into `to`, following symlinks, skipping excluded entries.
/// An excluded directory is skipped with everything below it.
fn copy_tree(from: &Path, to: &Path, excludes: &GlobSet) -> Result<(), (PathBuf, io::Error)> {
    fs::create_dir_all(to).map_err(|e| (to.to_path_buf(), e))?;

    let mut queue = VecDeque::new();
    queue.push_back(from.to_path_buf());

    while let Some(current_dir) = queue.pop_front() {
        let entries = fs::read_dir(&current_dir).map_err(|e| (current_dir.clone(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| (current_dir.clone(), e))?;
            let path = entry.path();
            let relative_path = path.strip_prefix(from).unwrap_or(&path);

            if excludes.is_match(relative_path) {
                continue;
            }

            let target = to.join(relative_path);
            // fs::metadata follows symlinks, so linked resources are copied as content
            let metadata = fs::metadata(&path).map_err(|e| (path.clone(), e))?;
            if metadata.is_dir() {
                fs::create_dir_all(&target).map_err(|e| (target.clone(), e))?;
                queue.push_back(path);
            } else {
                fs::copy(&path, &target).map_err(|e| (path.clone(), e))?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_copy_tree_with_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("templates/welcome.html"), "<p>hi</p>");
        write(&root.join("templates/welcome.mjml"), "<mjml/>");
        write(&root.join("templates/partials/footer.mjml"), "<mjml/>");
        write(&root.join("templates/partials/footer.html"), "<p/>");
        write(&root.join("templates/nested/deep.html"), "<p/>");

        let op = FsOp::CopyTree {
            from: "templates".into(),
            to: "dist/server/templates".into(),
            exclude: vec!["*.mjml".into(), "partials".into()],
        };
        apply(&op, root).unwrap();

        let out = root.join("dist/server/templates");
        assert!(out.join("welcome.html").exists());
        assert!(out.join("nested/deep.html").exists());
        assert!(!out.join("welcome.mjml").exists());
        assert!(!out.join("partials").exists());
    }

    #[test]
    fn test_star_exclude_stays_at_top_level() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("templates/invite.mjml"), "<mjml/>");
        write(&root.join("templates/sub/reset.mjml"), "<mjml/>");
        write(&root.join("templates/sub/reset.html"), "<p/>");

        let op = FsOp::CopyTree {
            from: "templates".into(),
            to: "out".into(),
            exclude: vec!["*.mjml".into()],
        };
        apply(&op, root).unwrap();

        let out = root.join("out");
        assert!(!out.join("invite.mjml").exists());
        assert!(out.join("sub/reset.mjml").exists());
        assert!(out.join("sub/reset.html").exists());
    }

    #[test]
    fn test_double_star_exclude_reaches_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("templates/invite.mjml"), "<mjml/>");
        write(&root.join("templates/sub/reset.mjml"), "<mjml/>");

        let op = FsOp::CopyTree {
            from: "templates".into(),
            to: "out".into(),
            exclude: vec!["**/*.mjml".into()],
        };
        apply(&op, root).unwrap();

        let out = root.join("out");
        assert!(!out.join("invite.mjml").exists());
        assert!(!out.join("sub/reset.mjml").exists());
        assert!(out.join("sub").is_dir());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("dist/server/bin/server"), "bin");

        let op = FsOp::Remove {
            path: "dist".into(),
        };
        apply(&op, root).unwrap();
        assert!(!root.join("dist").exists());
        apply(&op, root).unwrap();
    }

    #[test]
    fn test_copy_file_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("bin/server_linux_amd64/server"), "elf");
        fs::create_dir_all(root.join("dist/bin")).unwrap();

        let op = FsOp::CopyFile {
            from: "bin/server_linux_amd64/server".into(),
            to: "dist/bin".into(),
        };
        apply(&op, root).unwrap();
        assert_eq!(fs::read_to_string(root.join("dist/bin/server")).unwrap(), "elf");
    }

    #[test]
    fn test_missing_source_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let op = FsOp::CopyTree {
            from: "fonts".into(),
            to: "dist/fonts".into(),
            exclude: Vec::new(),
        };
        let (path, err) = apply(&op, dir.path()).unwrap_err();
        assert!(path.ends_with("fonts"));
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
