use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::{try_walk, walk, WalkDir, WalkError};

/// `a.txt`, `b.txt`, `sub/`, `sub/c.txt`.
fn small_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), b"a").unwrap();
    fs::write(dir.path().join("b.txt"), b"b").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub/c.txt"), b"c").unwrap();
    dir
}

/// A chain of `depth` nested directories, with `files` files in each.
fn deep_tree(depth: usize, files: usize) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let mut current = dir.path().to_owned();
    for level in 0..depth {
        for file in 0..files {
            fs::write(current.join(format!("file{}", file)), b"").unwrap();
        }
        current.push(format!("level{}", level));
        fs::create_dir(&current).unwrap();
    }
    dir
}

fn reference_count(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .count()
}

fn relative(root: &Path, paths: Vec<PathBuf>) -> BTreeSet<PathBuf> {
    paths
        .into_iter()
        .map(|path| path.strip_prefix(root).unwrap().to_owned())
        .collect()
}

#[test]
fn counts_files_and_directories() {
    let dir = small_tree();
    let paths = walk(dir.path());

    assert_eq!(paths.len(), 4);
    let expected: BTreeSet<PathBuf> = ["a.txt", "b.txt", "sub", "sub/c.txt"]
        .iter()
        .map(PathBuf::from)
        .collect();
    assert_eq!(relative(dir.path(), paths), expected);
}

#[test]
fn parents_come_before_children() {
    let dir = small_tree();
    let paths = walk(dir.path());

    let sub = paths.iter().position(|p| p.ends_with("sub")).unwrap();
    let inner = paths.iter().position(|p| p.ends_with("sub/c.txt")).unwrap();
    assert!(sub < inner);
}

#[test]
fn empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    assert!(try_walk(dir.path()).unwrap().is_empty());
}

#[test]
fn missing_root_is_not_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");

    assert!(walk(&missing).is_empty());
    match try_walk(&missing) {
        Err(WalkError::NotADirectory(path)) => assert_eq!(path, missing),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn file_root_is_not_a_directory() {
    let dir = small_tree();
    let file = dir.path().join("a.txt");

    assert!(walk(&file).is_empty());
    let err = try_walk(&file).unwrap_err();
    assert!(matches!(err, WalkError::NotADirectory(_)));
    assert_eq!(err.path(), file);
    assert!(err.to_string().contains("not an existing directory"));
}

#[test]
fn bad_root_iterates_nothing() {
    assert_eq!(WalkDir::new("/definitely/not/here").into_iter().count(), 0);
}

#[test]
fn hidden_entries_are_counted() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(".hidden"), b"").unwrap();
    fs::create_dir(dir.path().join(".git")).unwrap();
    fs::write(dir.path().join(".git/HEAD"), b"").unwrap();

    assert_eq!(walk(dir.path()).len(), 3);
}

#[test]
fn symlinks_are_not_followed() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("real")).unwrap();
    fs::write(dir.path().join("real/x.txt"), b"").unwrap();
    std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

    let entries: Vec<_> = WalkDir::new(dir.path()).into_iter().collect();
    assert_eq!(entries.len(), 3);

    let link = entries.iter().find(|e| e.file_name() == "link").unwrap();
    assert!(link.path_is_symlink());
    assert!(!link.file_type().is_dir());
    assert_eq!(entries.len(), reference_count(dir.path()));
}

#[test]
fn symlinked_root_is_followed() {
    let dir = small_tree();
    let other = tempfile::tempdir().unwrap();
    let link = other.path().join("root");
    std::os::unix::fs::symlink(dir.path(), &link).unwrap();

    assert_eq!(walk(&link).len(), 4);
}

#[test]
fn depth_and_names() {
    let dir = small_tree();
    for entry in WalkDir::new(dir.path()) {
        let expected = if entry.file_name() == "c.txt" { 2 } else { 1 };
        assert_eq!(entry.depth(), expected, "{}", entry.path().display());
        assert_eq!(entry.path().file_name().unwrap(), entry.file_name());
        assert!(entry.metadata().is_ok());
    }
}

#[test]
fn max_depth_limits_descent() {
    let dir = deep_tree(4, 2);

    assert_eq!(WalkDir::new(dir.path()).max_depth(0).into_iter().count(), 0);
    // Two files and the first level directory.
    assert_eq!(WalkDir::new(dir.path()).max_depth(1).into_iter().count(), 3);
    assert_eq!(WalkDir::new(dir.path()).max_depth(2).into_iter().count(), 6);
    assert!(WalkDir::new(dir.path()).max_depth(2).into_iter().all(|e| e.depth() <= 2));
}

#[test]
fn matches_walkdir_on_deep_tree() {
    let dir = deep_tree(40, 3);
    let expected = reference_count(dir.path());
    assert_eq!(expected, 40 * 4);
    assert_eq!(walk(dir.path()).len(), expected);
}

#[test]
fn spills_when_out_of_descriptors() {
    let dir = deep_tree(20, 3);

    let mut iter = WalkDir::new(dir.path()).max_open(2).into_iter();
    let paths: Vec<_> = iter.by_ref().map(|entry| entry.into_path()).collect();
    assert!(iter.stats.nr_spill > 0);
    assert!(iter.open == 0);

    let all = relative(dir.path(), walk(dir.path()));
    assert_eq!(paths.len(), all.len());
    assert_eq!(relative(dir.path(), paths), all);
}

#[test]
fn single_descriptor_is_enough() {
    let dir = deep_tree(10, 2);
    let count = WalkDir::new(dir.path()).max_open(0).into_iter().count();
    assert_eq!(count, reference_count(dir.path()));
}

#[test]
fn large_directory_needs_several_reads() {
    let dir = tempfile::tempdir().unwrap();
    for file in 0..2000 {
        fs::write(dir.path().join(format!("some-longer-file-name-{:05}", file)), b"").unwrap();
    }

    let mut iter = WalkDir::new(dir.path()).buffer_size(0).into_iter();
    assert_eq!(iter.by_ref().count(), 2000);
    assert!(iter.stats.nr_getdent > 2);
    assert_eq!(iter.stats.nr_open, 1);
    assert_eq!(iter.stats.nr_close, 1);
}

#[test]
fn spilled_large_directory_is_complete() {
    let dir = tempfile::tempdir().unwrap();
    for file in 0..500 {
        fs::create_dir(dir.path().join(format!("dir-{:04}", file))).unwrap();
    }
    fs::write(dir.path().join("dir-0000/inner"), b"").unwrap();

    let count = WalkDir::new(dir.path())
        .max_open(1)
        .buffer_size(0)
        .into_iter()
        .count();
    assert_eq!(count, 501);
}

#[test]
fn unreadable_directory_is_skipped() {
    use std::os::unix::fs::PermissionsExt;

    let dir = small_tree();
    let locked = dir.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::write(locked.join("secret"), b"").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users read it anyway.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let errors = Arc::new(Mutex::new(vec![]));
    let seen = errors.clone();
    let paths: Vec<_> = WalkDir::new(dir.path())
        .on_error(move |err| seen.lock().unwrap().push((err.path().to_owned(), err.depth())))
        .into_iter()
        .map(|entry| entry.into_path())
        .collect();

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    // The directory itself is still an entry.
    assert_eq!(paths.len(), 5);
    assert!(paths.contains(&locked));
    assert_eq!(*errors.lock().unwrap(), vec![(locked, 1)]);
}

#[test]
fn unopenable_root_fails_to_enumerate() {
    use std::os::unix::fs::PermissionsExt;

    let dir = small_tree();
    let root = dir.path().join("sub");
    fs::set_permissions(&root, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users open it anyway.
    if fs::read_dir(&root).is_ok() {
        fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let result = try_walk(&root);
    let empty = walk(&root);
    fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();

    match result {
        Err(WalkError::Enumerator { path, source }) => {
            assert_eq!(path, root);
            assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(empty.is_empty());
}
