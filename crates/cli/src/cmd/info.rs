//! `forge info`: one recipe as the build would see it on this platform.

use anyhow::{Context as _, Result, anyhow};

use forge_lib::cache::{BuildCache, CacheKey};
use forge_lib::channel::ChannelPublisher;

use super::Context;
use crate::output::{print_json, print_stat};

pub fn cmd_info(ctx: &Context, name: &str) -> Result<()> {
  let graph = ctx.load_graph()?;
  let recipe = graph.get(name).ok_or_else(|| anyhow!("Unknown recipe '{name}'"))?;
  let platform = ctx.platform()?;

  let key = CacheKey::derive(recipe, &platform).context("Failed to compute cache key")?;
  let cached = BuildCache::new(&ctx.cache).lookup(&key).hit();
  let bucket = ChannelPublisher::bucket_for(recipe, &platform);
  let published = ChannelPublisher::new(&ctx.channel).contains(bucket, &recipe.name, &recipe.version);
  let script = recipe.script_for(&platform);

  if ctx.format.is_json() {
    return print_json(&serde_json::json!({
      "recipe": recipe,
      "platform": platform.subdir(),
      "script": script.as_ref().map(|s| s.path.clone()),
      "cache_key": key,
      "cached_artifact": cached.as_ref().map(|e| e.artifact.clone()),
      "bucket": bucket,
      "published": published,
    }));
  }

  println!("{} {}", recipe.name, recipe.version);
  print_stat("Directory", &recipe.dir.display().to_string());
  print_stat(
    "Dependencies",
    &if recipe.dependencies.is_empty() {
      "none".to_string()
    } else {
      recipe.dependencies.join(", ")
    },
  );
  print_stat(
    "Build script",
    &match &script {
      Some(s) => format!("{} ({})", s.path.display(), s.key),
      None => format!("none for {platform}"),
    },
  );
  let config = &recipe.configuration;
  if let Some(compiler) = &config.compiler {
    let version = config.compiler_version.as_deref().unwrap_or("any");
    print_stat("Compiler", &format!("{compiler} {version}"));
  }
  if !config.flags.is_empty() {
    print_stat("Flags", &config.flags.join(" "));
  }
  for (field, value) in &config.extra {
    print_stat(field, value);
  }
  if !recipe.outputs.is_empty() {
    let outputs: Vec<String> = recipe.outputs.iter().map(|p| p.display().to_string()).collect();
    print_stat("Outputs", &outputs.join(", "));
  }
  print_stat("Cache key", key.as_str());
  print_stat(
    "Cached",
    &match &cached {
      Some(entry) => entry.artifact.display().to_string(),
      None => "no".to_string(),
    },
  );
  print_stat(
    "Published",
    &if published { format!("yes ({bucket})") } else { "no".to_string() },
  );

  Ok(())
}
