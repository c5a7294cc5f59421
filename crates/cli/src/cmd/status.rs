//! Status command implementation.
//!
//! Lists every scope under the state directory together with its records.

use std::path::Path;

use anyhow::{Context, Result};

use cairn_lib::consts::SCOPE_KIND;

use crate::inspect::load_scopes;
use crate::output::{format_status, print_info, print_json, print_stat, print_success, print_warning, symbols};

pub fn cmd_status(state_dir: &Path, verbose: bool, json: bool) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let scopes = rt.block_on(load_scopes(state_dir))?;

  if json {
    let items: Vec<_> = scopes
      .iter()
      .map(|scope| {
        let records: Vec<_> = scope
          .records
          .iter()
          .map(|(id, record)| {
            serde_json::json!({
              "id": id,
              "fqn": format!("{}/{}", scope.path, id),
              "kind": record.provider,
              "status": record.status,
              "seq": record.seq,
              "deps": record.deps,
            })
          })
          .collect();
        serde_json::json!({ "scope": scope.path, "records": records })
      })
      .collect();
    return print_json(&items);
  }

  if scopes.is_empty() {
    print_info(&format!("No state found under {}", state_dir.display()));
    return Ok(());
  }

  let mut resources = 0;
  let mut in_flight = 0;
  for scope in &scopes {
    print_success(&scope.path);
    for (id, record) in &scope.records {
      let kind = if record.provider == SCOPE_KIND {
        "scope"
      } else {
        record.provider.as_str()
      };
      println!("  {} {} {} ({})", symbols::INFO, format_status(record.status), id, kind);
      if verbose {
        print_stat("    seq", &record.seq.to_string());
        if !record.deps.is_empty() {
          print_stat("    deps", &record.deps.join(", "));
        }
        if !record.pending_deletions.is_empty() {
          print_stat("    pending deletions", &record.pending_deletions.len().to_string());
        }
      }
      resources += 1;
      if !record.status.is_settled() {
        in_flight += 1;
      }
    }
  }

  println!();
  print_stat("Scopes", &scopes.len().to_string());
  print_stat("Records", &resources.to_string());
  if in_flight > 0 {
    print_warning(&format!(
      "{} record(s) did not finish their last operation; the next run retries them",
      in_flight
    ));
  }

  Ok(())
}
