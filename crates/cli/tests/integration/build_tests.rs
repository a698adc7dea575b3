use predicates::prelude::*;

use super::common::TestEnv;

fn diamond(env: &TestEnv) {
  env.lib_recipe("a", &[]);
  env.lib_recipe("b", &["a"]);
  env.lib_recipe("c", &["a"]);
  env.lib_recipe("d", &["b", "c"]);
}

#[test]
fn build_all_then_cached() {
  let env = TestEnv::new();
  diamond(&env);

  env
    .forge_cmd()
    .args(["build", "--all", "--quiet"])
    .assert()
    .success()
    .stdout(predicate::str::contains("d 1.0.0 built"))
    .stdout(predicate::str::contains("Build complete"));

  env
    .forge_cmd()
    .args(["build", "--all", "--quiet"])
    .assert()
    .success()
    .stdout(predicate::str::contains("a 1.0.0 cached"))
    .stdout(predicate::str::contains("Cached: 4"));
}

#[test]
fn build_single_target_builds_its_dependencies() {
  let env = TestEnv::new();
  diamond(&env);

  let out = env
    .forge_cmd()
    .args(["build", "b", "--quiet", "--format", "json"])
    .output()
    .unwrap();
  assert!(out.status.success());

  let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
  let names: Vec<&str> = report["results"]
    .as_array()
    .unwrap()
    .iter()
    .map(|r| r["recipe"].as_str().unwrap())
    .collect();
  assert_eq!(names, vec!["a", "b"]);
  assert_eq!(report["results"][1]["state"], "succeeded");
}

#[test]
fn live_output_is_prefixed_with_recipe_name() {
  let env = TestEnv::new();
  env.lib_recipe("zlib", &[]);

  env
    .forge_cmd()
    .args(["build", "zlib"])
    .assert()
    .success()
    .stdout(predicate::str::contains("[zlib] building zlib"));
}

#[test]
fn failing_recipe_sets_exit_code_and_reports_log() {
  let env = TestEnv::new();
  diamond(&env);
  env.recipe("b", &["a"], "echo \"compile error in b.c\" >&2\nexit 1");

  env
    .forge_cmd()
    .args(["build", "--all", "--quiet", "--continue-on-error"])
    .assert()
    .failure()
    .stdout(predicate::str::contains("b 1.0.0 failed"))
    .stdout(predicate::str::contains("compile error in b.c"))
    .stdout(predicate::str::contains("log:"))
    .stdout(predicate::str::contains("c 1.0.0 built"))
    .stdout(predicate::str::contains("d 1.0.0 skipped: dependency 'b' did not build"));
}

#[test]
fn failure_without_continue_aborts() {
  let env = TestEnv::new();
  diamond(&env);
  env.recipe("b", &["a"], "exit 7");

  env
    .forge_cmd()
    .args(["build", "--all", "--quiet"])
    .assert()
    .failure()
    .stdout(predicate::str::contains("exited with code 7"))
    .stdout(predicate::str::contains("c 1.0.0 skipped: aborted"));
}

#[test]
fn parallel_build_succeeds() {
  let env = TestEnv::new();
  diamond(&env);

  env
    .forge_cmd()
    .args(["build", "--all", "--quiet", "--jobs", "4"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Built: 4"));
}

#[test]
fn timeout_fails_the_recipe() {
  let env = TestEnv::new();
  env.recipe("slow", &[], "sleep 30");

  env
    .forge_cmd()
    .args(["build", "slow", "--quiet", "--timeout", "1s"])
    .timeout(std::time::Duration::from_secs(60))
    .assert()
    .failure()
    .stdout(predicate::str::contains("timed out"));
}

#[test]
fn build_publishes_into_channel() {
  let env = TestEnv::new();
  env.lib_recipe("zlib", &[]);

  env
    .forge_cmd()
    .args(["build", "zlib", "--quiet", "--platform", "linux-64"])
    .assert()
    .success();

  assert!(env.channel_path().join("linux-64/zlib-1.0.0.tar.gz").is_file());
  env
    .forge_cmd()
    .args(["channel", "list", "linux-64"])
    .assert()
    .success()
    .stdout(predicate::str::contains("zlib 1.0.0"));
}
