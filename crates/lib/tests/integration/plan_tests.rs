use forge_lib::orchestrate::{OrchestrateError, Selection};
use forge_lib::recipe::{self, LoadError};
use forge_lib::resolve::{self, ResolveError};

use super::common::Workspace;

fn descriptor(ws: &Workspace, name: &str, body: &str) {
  let dir = ws.recipes().join(name);
  std::fs::create_dir_all(&dir).unwrap();
  std::fs::write(dir.join("recipe.yaml"), body).unwrap();
}

#[test]
fn plan_orders_dependencies_first() {
  let ws = Workspace::new();
  descriptor(&ws, "openssl", "name: openssl\nversion: 3.2.0\ndependencies: [zlib]\n");
  descriptor(&ws, "zlib", "name: zlib\nversion: 1.3.1\n");
  descriptor(&ws, "curl", "name: curl\nversion: 8.5.0\ndependencies: [openssl, zlib]\n");
  descriptor(&ws, "cmake", "name: cmake\nversion: 3.28.0\nnoarch: true\n");

  let graph = recipe::load(&ws.recipes()).unwrap();
  let plan = resolve::order(&graph).unwrap();
  assert_eq!(plan.0, vec!["cmake", "zlib", "openssl", "curl"]);

  let subset = resolve::subset(&graph, &["openssl"]).unwrap();
  assert_eq!(subset.0, vec!["zlib", "openssl"]);
}

#[test]
fn cycle_is_reported_by_the_orchestrator() {
  let ws = Workspace::new();
  descriptor(&ws, "a", "name: a\nversion: 1\ndependencies: [b]\n");
  descriptor(&ws, "b", "name: b\nversion: 1\ndependencies: [a]\n");
  descriptor(&ws, "c", "name: c\nversion: 1\n");

  let orch = ws.orchestrator(|_| {});
  match orch.plan(&Selection::All) {
    Err(OrchestrateError::Resolve(ResolveError::Cycle(cycle))) => assert_eq!(cycle.unresolved, vec!["a", "b"]),
    other => panic!("expected a cycle, got {other:?}"),
  }
}

#[test]
fn unknown_dependency_fails_loading() {
  let ws = Workspace::new();
  descriptor(&ws, "curl", "name: curl\nversion: 8.5.0\ndependencies: [nghttp2]\n");

  match recipe::load(&ws.recipes()) {
    Err(LoadError::UnknownDependency { recipe, dependency }) => {
      assert_eq!(recipe, "curl");
      assert_eq!(dependency, "nghttp2");
    }
    other => panic!("expected unknown dependency, got {other:?}"),
  }
}
