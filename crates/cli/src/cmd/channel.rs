use anyhow::Result;

use forge_lib::channel::{ChannelIndex, ChannelPublisher};
use forge_lib::platform::Platform;

use super::Context;
use crate::output::{format_bytes, print_info, print_json};

pub fn cmd_channel_list(ctx: &Context, bucket: Option<&str>) -> Result<()> {
  let publisher = ChannelPublisher::new(&ctx.channel);
  let buckets: Vec<&str> = match bucket {
    Some(bucket) => vec![bucket],
    None => Platform::all_buckets().collect(),
  };

  let indexes = buckets
    .into_iter()
    .map(|b| publisher.read_index(b))
    .collect::<Result<Vec<ChannelIndex>, _>>()?;

  if ctx.format.is_json() {
    return print_json(&indexes);
  }

  let mut empty = true;
  for index in indexes.iter().filter(|i| !i.packages.is_empty()) {
    empty = false;
    println!("{}:", index.subdir);
    for record in index.packages.values() {
      println!(
        "  {} {} ({}, sha256 {})",
        record.name,
        record.version,
        format_bytes(record.size),
        &record.sha256[..record.sha256.len().min(12)]
      );
    }
  }
  if empty {
    print_info(&format!("No packages published in {}", publisher.root().display()));
  }
  Ok(())
}
