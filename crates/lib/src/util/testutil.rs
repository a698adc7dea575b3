//! Test utilities for forge-lib.
//!
//! Helpers that lay out recipe roots on disk. Build scripts are POSIX shell,
//! the Unix shell is used for every test that actually runs one.

use std::fs;
use std::path::{Path, PathBuf};

/// Write `<root>/<name>/recipe.yaml` with a `unix` build script whose body is `script`.
///
/// Returns the recipe directory.
pub fn write_recipe(root: &Path, name: &str, deps: &[&str], script: &str) -> PathBuf {
  let dir = root.join(name);
  fs::create_dir_all(&dir).unwrap();

  let deps = deps.iter().map(|d| format!("\"{d}\"")).collect::<Vec<_>>().join(", ");
  let descriptor = format!("name: {name}\nversion: \"1.0.0\"\ndependencies: [{deps}]\nbuild:\n  unix: build.sh\n");
  fs::write(dir.join("recipe.yaml"), descriptor).unwrap();
  fs::write(dir.join("build.sh"), format!("#!/bin/sh\nset -e\n{script}\n")).unwrap();
  dir
}

/// Create a small artifact tree under `dir` for cache and channel tests.
pub fn write_artifact(dir: &Path) {
  fs::create_dir_all(dir.join("lib")).unwrap();
  fs::create_dir_all(dir.join("include")).unwrap();
  fs::write(dir.join("lib/libdemo.a"), b"archive").unwrap();
  fs::write(dir.join("include/demo.h"), b"int demo(void);\n").unwrap();
}
