//! Show command implementation.
//!
//! Prints a single record. Secrets stay encrypted unless `--reveal` is given.

use std::path::Path;

use anyhow::{Context, Result, bail};

use cairn_lib::codec::{Passphrase, reveal_secrets};
use cairn_lib::consts::ENV_PASSPHRASE;

use crate::inspect::find_record;
use crate::output::{format_status, print_error, print_json, print_stat, print_success};

pub fn cmd_show(state_dir: &Path, fqn: &str, reveal: bool, json: bool) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let Some((scope, id, record)) = rt.block_on(find_record(state_dir, fqn))? else {
    print_error(&format!("No record found for {}", fqn));
    bail!("unknown resource {}", fqn);
  };

  let mut tree = serde_json::to_value(&record).context("Failed to serialize record")?;
  if reveal {
    let passphrase = match std::env::var(ENV_PASSPHRASE) {
      Ok(p) if !p.is_empty() => Passphrase::new(p),
      _ => bail!("--reveal needs {} to be set", ENV_PASSPHRASE),
    };
    tree = reveal_secrets(&tree, &passphrase).context("Failed to decrypt secrets")?;
  }

  if json {
    return print_json(&tree);
  }

  print_success(&format!("{}/{}", scope, id));
  print_stat("Kind", &record.provider);
  print_stat("Status", format_status(record.status).trim_end());
  print_stat("Seq", &record.seq.to_string());
  if !record.deps.is_empty() {
    print_stat("Deps", &record.deps.join(", "));
  }
  for key in ["inputs", "output", "data"] {
    let value = &tree[key];
    if value.is_null() || value.as_object().is_some_and(|m| m.is_empty()) {
      continue;
    }
    println!();
    println!("{}:", key);
    println!("{}", serde_json::to_string_pretty(value).context("Failed to format record")?);
  }

  Ok(())
}
