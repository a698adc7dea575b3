//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated recipe, output and cache directories for one test.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn recipes_path(&self) -> PathBuf {
    self.temp.path().join("recipes")
  }

  pub fn output_path(&self) -> PathBuf {
    self.temp.path().join("out")
  }

  pub fn cache_path(&self) -> PathBuf {
    self.temp.path().join("cache")
  }

  pub fn channel_path(&self) -> PathBuf {
    self.output_path().join("channel")
  }

  /// Write a recipe with a unix build script. `script` runs under `set -e`.
  pub fn recipe(&self, name: &str, deps: &[&str], script: &str) {
    let dir = self.recipes_path().join(name);
    std::fs::create_dir_all(&dir).unwrap();
    let deps = deps.iter().map(|d| format!("\"{d}\"")).collect::<Vec<_>>().join(", ");
    std::fs::write(
      dir.join("recipe.yaml"),
      format!("name: {name}\nversion: \"1.0.0\"\ndependencies: [{deps}]\nbuild:\n  unix: build.sh\n"),
    )
    .unwrap();
    std::fs::write(dir.join("build.sh"), format!("#!/bin/sh\nset -e\n{script}\n")).unwrap();
  }

  /// Recipe whose script installs `lib/lib<name>.a`.
  pub fn lib_recipe(&self, name: &str, deps: &[&str]) {
    self.recipe(
      name,
      deps,
      &format!("mkdir -p \"$PREFIX/lib\"\necho {name} > \"$PREFIX/lib/lib{name}.a\"\necho \"building {name}\""),
    );
  }

  /// A forge command pointed at this environment.
  pub fn forge_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("forge");
    cmd.env("FORGE_RECIPES", self.recipes_path());
    cmd.env("FORGE_OUTPUT", self.output_path());
    cmd.env("FORGE_CACHE_DIR", self.cache_path());
    cmd.env_remove("FORGE_CHANNEL_DIR");
    cmd.env_remove("RUST_LOG");
    cmd
  }
}
