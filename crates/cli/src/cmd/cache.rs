//! `forge cache`: inspect and prune the build cache.

use anyhow::{Context as _, Result};

use forge_lib::cache::{BuildCache, EntryStatus};
use forge_lib::run_lock::RunLock;

use super::Context;
use crate::output::{format_bytes, print_info, print_json, print_stat, print_success, symbols};
use crate::prompts::confirm;

fn lock(ctx: &Context, command: &str) -> Result<RunLock> {
  RunLock::acquire(&[ctx.cache.as_path()], command).context("Failed to acquire run lock")
}

pub fn cmd_cache_status(ctx: &Context) -> Result<()> {
  let stats = BuildCache::new(&ctx.cache).status().context("Failed to read cache")?;

  if ctx.format.is_json() {
    return print_json(&stats);
  }

  print_info(&format!("Cache at {}", stats.root.display()));
  print_stat("Entries", &stats.entries.to_string());
  print_stat("Built", &stats.built.to_string());
  print_stat("Stale", &stats.stale.to_string());
  if stats.corrupt > 0 {
    print_stat("Corrupt", &stats.corrupt.to_string());
  }
  print_stat("Artifacts", &format_bytes(stats.artifact_bytes));
  Ok(())
}

pub fn cmd_cache_list(ctx: &Context) -> Result<()> {
  let entries = BuildCache::new(&ctx.cache).list().context("Failed to read cache")?;

  if ctx.format.is_json() {
    return print_json(&entries);
  }

  if entries.is_empty() {
    print_info("Cache is empty");
    return Ok(());
  }

  for entry in &entries {
    let marker = match entry.status {
      EntryStatus::Built => symbols::SUCCESS,
      EntryStatus::Stale => symbols::SKIP,
    };
    println!(
      "{} {} {} {} {}",
      marker,
      entry.recipe,
      entry.version,
      entry.key.short(),
      entry.artifact.display()
    );
  }
  Ok(())
}

pub fn cmd_cache_clear(ctx: &Context, force: bool) -> Result<()> {
  let cache = BuildCache::new(&ctx.cache);
  if !confirm(&format!("Remove every entry in {}?", cache.root().display()), force)? {
    print_info("Cache left untouched");
    return Ok(());
  }

  let _lock = lock(ctx, "cache clear")?;
  let removed = cache.clear().context("Failed to clear cache")?;

  if ctx.format.is_json() {
    return print_json(&serde_json::json!({ "removed": removed }));
  }
  print_success(&format!("Removed {removed} cache entries"));
  Ok(())
}

pub fn cmd_cache_invalidate(ctx: &Context, recipe: &str) -> Result<()> {
  let _lock = lock(ctx, "cache invalidate")?;
  let cache = BuildCache::new(&ctx.cache);
  let invalidated = cache
    .invalidate_recipe(recipe)
    .with_context(|| format!("Failed to invalidate cache entries for {recipe}"))?;

  if ctx.format.is_json() {
    return print_json(&serde_json::json!({ "recipe": recipe, "invalidated": invalidated }));
  }
  if invalidated == 0 {
    print_info(&format!("No cache entries for {recipe}"));
  } else {
    print_success(&format!("Marked {invalidated} cache entries for {recipe} stale"));
  }
  Ok(())
}
