//! Shared helpers for library integration tests.

use std::path::{Path, PathBuf};

use forge_lib::cache::BuildCache;
use forge_lib::channel::ChannelPublisher;
use forge_lib::execute::{ExecutorConfig, ScriptExecutor};
use forge_lib::orchestrate::{Orchestrator, OrchestratorOptions};
use forge_lib::platform::Platform;
use tempfile::TempDir;

/// Recipe root, output, cache and channel directories under one temp dir.
pub struct Workspace {
  pub temp: TempDir,
}

impl Workspace {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn recipes(&self) -> PathBuf {
    self.temp.path().join("recipes")
  }

  pub fn output(&self) -> PathBuf {
    self.temp.path().join("out")
  }

  pub fn cache_dir(&self) -> PathBuf {
    self.temp.path().join("cache")
  }

  pub fn channel_dir(&self) -> PathBuf {
    self.output().join("channel")
  }

  /// Write a recipe whose unix script body is `script`, declaring `outputs`.
  pub fn recipe(&self, name: &str, deps: &[&str], outputs: &[&str], script: &str) -> PathBuf {
    let dir = self.recipes().join(name);
    std::fs::create_dir_all(&dir).unwrap();

    let list = |items: &[&str]| items.iter().map(|d| format!("\"{d}\"")).collect::<Vec<_>>().join(", ");
    let descriptor = format!(
      "name: {name}\nversion: \"1.0.0\"\ndependencies: [{}]\noutputs: [{}]\nbuild:\n  unix: build.sh\n",
      list(deps),
      list(outputs)
    );
    std::fs::write(dir.join("recipe.yaml"), descriptor).unwrap();
    std::fs::write(dir.join("build.sh"), format!("#!/bin/sh\nset -e\n{script}\n")).unwrap();
    dir
  }

  /// Write `build_config.yaml` at the recipe root.
  pub fn defaults(&self, content: &str) {
    std::fs::create_dir_all(self.recipes()).unwrap();
    std::fs::write(self.recipes().join("build_config.yaml"), content).unwrap();
  }

  /// Orchestrator over the current recipe tree with quiet script output.
  pub fn orchestrator(&self, tweak: impl FnOnce(&mut OrchestratorOptions)) -> Orchestrator<ScriptExecutor> {
    let config = ExecutorConfig {
      output_dir: self.output(),
      echo: false,
      ..Default::default()
    };
    let mut options = OrchestratorOptions::new(Platform::current().unwrap());
    tweak(&mut options);

    Orchestrator::load(
      &self.recipes(),
      BuildCache::new(self.cache_dir()),
      ChannelPublisher::new(self.channel_dir()),
      ScriptExecutor::new(config),
      options,
    )
    .unwrap()
  }
}

/// Script body that installs a static library and header named after the recipe.
pub fn install_lib(name: &str) -> String {
  format!(
    "mkdir -p \"$PREFIX/lib\" \"$PREFIX/include\"\n\
     echo \"{name}\" > \"$PREFIX/lib/lib{name}.a\"\n\
     echo \"int {name}(void);\" > \"$PREFIX/include/{name}.h\""
  )
}

pub fn read(path: &Path) -> String {
  std::fs::read_to_string(path).unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
}
