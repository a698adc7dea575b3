use predicates::prelude::*;

use super::common::TestEnv;

fn built(env: &TestEnv) {
  env.lib_recipe("zlib", &[]);
  env.forge_cmd().args(["build", "zlib", "--quiet"]).assert().success();
}

#[test]
fn cache_list_shows_built_entries() {
  let env = TestEnv::new();
  built(&env);

  env
    .forge_cmd()
    .args(["cache", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("zlib 1.0.0"));
}

#[test]
fn invalidate_forces_a_rebuild() {
  let env = TestEnv::new();
  built(&env);

  env
    .forge_cmd()
    .args(["cache", "invalidate", "zlib"])
    .assert()
    .success()
    .stdout(predicate::str::contains("stale"));

  env
    .forge_cmd()
    .args(["build", "zlib", "--quiet"])
    .assert()
    .success()
    .stdout(predicate::str::contains("zlib 1.0.0 built"));
}

#[test]
fn clear_with_force_empties_the_cache() {
  let env = TestEnv::new();
  built(&env);

  env
    .forge_cmd()
    .args(["cache", "clear", "--force"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Removed 1 cache entries"));

  env
    .forge_cmd()
    .args(["cache", "status"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Entries: 0"));
}

#[test]
fn no_cache_rebuilds() {
  let env = TestEnv::new();
  built(&env);

  env
    .forge_cmd()
    .args(["build", "zlib", "--quiet", "--no-cache"])
    .assert()
    .success()
    .stdout(predicate::str::contains("zlib 1.0.0 built"));
}

#[test]
fn status_json_counts_entries() {
  let env = TestEnv::new();
  built(&env);

  let out = env.forge_cmd().args(["cache", "status", "--format", "json"]).output().unwrap();
  assert!(out.status.success());
  let stats: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
  assert_eq!(stats["entries"], 1);
  assert_eq!(stats["built"], 1);
}
