use forge_lib::cache::CacheKey;
use forge_lib::execute::ExecuteError;
use forge_lib::orchestrate::{BuildState, Selection, SkipReason};
use tokio_util::sync::CancellationToken;

use super::common::{Workspace, install_lib, read};

/// a <- b, a <- c, (b, c) <- d, each installing `lib<name>.a`.
fn diamond(ws: &Workspace) {
  ws.recipe("a", &[], &["lib/liba.a"], &install_lib("a"));
  ws.recipe("b", &["a"], &["lib/libb.a"], &install_lib("b"));
  ws.recipe("c", &["a"], &["lib/libc.a"], &install_lib("c"));
  ws.recipe(
    "d",
    &["b", "c"],
    &["lib/libd.a"],
    &format!(
      "test -f \"$DEP_B_PREFIX/lib/libb.a\"\ntest -f \"$DEP_C_PREFIX/lib/libc.a\"\ntest -f \"$DEP_A_PREFIX/lib/liba.a\"\n{}\necho \"$DEP_PREFIXES\" > \"$PREFIX/deps.txt\"",
      install_lib("d")
    ),
  );
}

#[tokio::test]
async fn diamond_builds_then_hits_cache() {
  let ws = Workspace::new();
  diamond(&ws);

  let orch = ws.orchestrator(|_| {});
  let report = orch.run(&Selection::All, CancellationToken::new()).await.unwrap();
  assert!(report.is_success(), "{report:#?}");
  assert_eq!(report.counts().succeeded, 4);

  let d = report.get("d").unwrap();
  let deps = read(&d.artifact.as_ref().unwrap().join("deps.txt"));
  let b = report.get("b").unwrap().artifact.clone().unwrap();
  let c = report.get("c").unwrap().artifact.clone().unwrap();
  let a = report.get("a").unwrap().artifact.clone().unwrap();
  assert_eq!(deps.trim(), format!("{}:{}:{}", b.display(), c.display(), a.display()));

  let bucket = orch.options().platform.subdir();
  assert_eq!(orch.channel().read_index(bucket).unwrap().packages.len(), 4);

  let again = ws.orchestrator(|_| {});
  let report = again.run(&Selection::All, CancellationToken::new()).await.unwrap();
  assert_eq!(report.counts().cached, 4);
}

#[tokio::test]
async fn editing_a_script_rebuilds_only_that_recipe() {
  let ws = Workspace::new();
  diamond(&ws);
  ws.orchestrator(|_| {})
    .run(&Selection::All, CancellationToken::new())
    .await
    .unwrap();

  ws.recipe("c", &["a"], &["lib/libc.a"], &format!("{}\necho v2 > \"$PREFIX/VERSION\"", install_lib("c")));
  let report = ws
    .orchestrator(|_| {})
    .run(&Selection::All, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.state_of("a"), Some(BuildState::Cached));
  assert_eq!(report.state_of("b"), Some(BuildState::Cached));
  assert_eq!(report.state_of("c"), Some(BuildState::Succeeded));
  assert_eq!(report.state_of("d"), Some(BuildState::Cached));
}

#[tokio::test]
async fn failing_script_reports_tail_and_log() {
  let ws = Workspace::new();
  diamond(&ws);
  ws.recipe("b", &["a"], &["lib/libb.a"], "echo \"configure: error: no compiler\" >&2\nexit 3");

  let orch = ws.orchestrator(|o| o.continue_on_error = true);
  let report = orch.run(&Selection::All, CancellationToken::new()).await.unwrap();

  assert!(!report.is_success());
  assert_eq!(report.state_of("c"), Some(BuildState::Succeeded));
  assert_eq!(
    report.get("d").unwrap().skip_reason,
    Some(SkipReason::DependencyFailed {
      dependency: "b".into()
    })
  );

  let b = report.get("b").unwrap();
  assert_eq!(
    b.failure,
    Some(ExecuteError::NonZeroExit {
      code: Some(3),
      signal: None
    })
  );
  assert!(b.tail.iter().any(|l| l.contains("no compiler")));
  let log = read(b.log_path.as_ref().unwrap());
  assert!(log.contains("configure: error: no compiler"));
}

#[tokio::test]
async fn missing_outputs_leave_no_artifact() {
  let ws = Workspace::new();
  ws.recipe("zlib", &[], &["lib/libz.a", "include/zlib.h"], "mkdir -p \"$PREFIX/lib\"\ntouch \"$PREFIX/lib/libz.a\"");

  let report = ws
    .orchestrator(|_| {})
    .run(&Selection::All, CancellationToken::new())
    .await
    .unwrap();

  let result = report.get("zlib").unwrap();
  match &result.failure {
    Some(ExecuteError::MissingOutputs { missing }) => {
      assert_eq!(missing.len(), 1);
      assert!(missing[0].ends_with("include/zlib.h"));
    }
    other => panic!("expected missing outputs, got {other:?}"),
  }
  let artifacts: Vec<_> = std::fs::read_dir(ws.output().join("artifacts"))
    .map(|entries| entries.flatten().collect())
    .unwrap_or_default();
  assert!(artifacts.is_empty(), "{artifacts:?}");
}

#[tokio::test]
async fn default_configuration_reaches_the_script() {
  let ws = Workspace::new();
  ws.defaults("flags: [\"-O2\", \"-fPIC\"]\nlinkage: static\n");
  ws.recipe(
    "zlib",
    &[],
    &["cflags.txt"],
    "echo \"$CFLAGS|$FORGE_CFG_LINKAGE\" > \"$PREFIX/cflags.txt\"",
  );

  let report = ws
    .orchestrator(|_| {})
    .run(&Selection::All, CancellationToken::new())
    .await
    .unwrap();

  let artifact = report.get("zlib").unwrap().artifact.clone().unwrap();
  assert_eq!(read(&artifact.join("cflags.txt")).trim(), "-O2 -fPIC|static");
}

#[tokio::test]
async fn no_cache_rebuilds_with_same_key() {
  let ws = Workspace::new();
  ws.recipe("zlib", &[], &["lib/libzlib.a"], &install_lib("zlib"));
  let first = ws
    .orchestrator(|_| {})
    .run(&Selection::All, CancellationToken::new())
    .await
    .unwrap();

  let orch = ws.orchestrator(|o| o.no_cache = true);
  let second = orch.run(&Selection::All, CancellationToken::new()).await.unwrap();

  assert_eq!(second.state_of("zlib"), Some(BuildState::Succeeded));
  let key = first.get("zlib").unwrap().cache_key.clone().unwrap();
  assert_eq!(second.get("zlib").unwrap().cache_key.as_deref(), Some(key.as_str()));
  assert!(orch.cache().lookup(&CacheKey(key)).hit().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_run_matches_sequential_states() {
  let ws = Workspace::new();
  diamond(&ws);

  let report = ws
    .orchestrator(|o| o.jobs = 4)
    .run(&Selection::All, CancellationToken::new())
    .await
    .unwrap();

  assert!(report.is_success(), "{report:#?}");
  assert_eq!(
    report.results.iter().map(|r| r.recipe.as_str()).collect::<Vec<_>>(),
    vec!["a", "b", "c", "d"]
  );
}
