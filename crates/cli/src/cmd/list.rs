use anyhow::Result;

use super::Context;
use crate::output::{print_detail, print_info, print_json};

pub fn cmd_list(ctx: &Context) -> Result<()> {
  let graph = ctx.load_graph()?;

  if ctx.format.is_json() {
    let recipes: Vec<_> = graph
      .recipes()
      .map(|r| serde_json::json!({ "name": r.name, "version": r.version, "dependencies": r.dependencies, "noarch": r.noarch }))
      .collect();
    return print_json(&recipes);
  }

  if graph.is_empty() {
    print_info(&format!("No recipes found in {}", ctx.recipes.display()));
    return Ok(());
  }

  for recipe in graph.recipes() {
    let noarch = if recipe.noarch { " (noarch)" } else { "" };
    println!("{} {}{}", recipe.name, recipe.version, noarch);
    if ctx.verbose > 0 && !recipe.dependencies.is_empty() {
      print_detail(&format!("depends on: {}", recipe.dependencies.join(", ")));
    }
  }

  Ok(())
}
