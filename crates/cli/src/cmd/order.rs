use anyhow::Result;

use forge_lib::resolve::{self, ResolveError};

use super::Context;
use crate::output::print_json;

pub fn cmd_order(ctx: &Context, targets: &[String]) -> Result<()> {
  let graph = ctx.load_graph()?;
  let plan = if targets.is_empty() {
    resolve::order(&graph).map_err(ResolveError::from)?
  } else {
    resolve::subset(&graph, targets)?
  };

  if ctx.format.is_json() {
    let waves = resolve::waves(&graph, &plan);
    return print_json(&serde_json::json!({ "order": plan, "waves": waves }));
  }

  for (i, name) in plan.iter().enumerate() {
    println!("{:>3}. {}", i + 1, name);
  }
  Ok(())
}
