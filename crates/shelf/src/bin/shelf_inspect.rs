//! Print a library or an item ordering as JSON.
//!
//! Usage:
//!   shelf-inspect <config.yaml> library <subject-id>
//!   shelf-inspect <config.yaml> items <collection-id>

use anyhow::{Context, Result, bail};
use serde_json::json;
use shelf::config::ShelfConfig;
use shelf::di::open_store;
use shelf::ledger::{ItemLedger, LibraryLedger};
use shelf::logging::init_tracing;
use shelf_api::{CollectionId, Position, SubjectId};
use std::path::PathBuf;

const USAGE: &str = "usage: shelf-inspect <config.yaml> (library <subject-id> | items <collection-id>)";

/// Number of slots missing from `0..=max`.
fn gaps(positions: &[Position]) -> usize {
    positions
        .iter()
        .max()
        .map_or(0, |max| (max.index() + 1).saturating_sub(positions.len()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("warn")?;

    let mut args = std::env::args().skip(1);
    let (Some(config_path), Some(command), Some(id)) = (args.next(), args.next(), args.next())
    else {
        bail!(USAGE);
    };

    let config = ShelfConfig::load_from_file(&PathBuf::from(config_path))?;
    let store = open_store(&config).await?;
    let mut tx = store.begin().await.context("Failed to open read transaction")?;

    let report = match command.as_str() {
        "library" => {
            let subject = SubjectId::parse(&id)?;
            let entries = LibraryLedger::snapshot(tx.as_mut(), subject).await?;
            let positions: Vec<Position> = entries.iter().map(|entry| entry.position).collect();
            json!({
                "subject": subject,
                "dense": gaps(&positions) == 0,
                "counts": LibraryLedger::kind_counts(&entries)
                    .iter()
                    .map(|(kind, count)| (kind.as_str(), *count))
                    .collect::<std::collections::BTreeMap<_, _>>(),
                "entries": entries,
            })
        }
        "items" => {
            let collection = CollectionId::parse(&id)?;
            let items = ItemLedger::snapshot(tx.as_mut(), collection).await?;
            let positions: Vec<Position> = items.iter().map(|item| item.position).collect();
            json!({
                "collection": collection,
                "gaps": gaps(&positions),
                "items": items,
            })
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(raw: &[u32]) -> Vec<Position> {
        raw.iter().copied().map(Position::new).collect()
    }

    #[test]
    fn gaps_counts_missing_slots() {
        assert_eq!(gaps(&[]), 0);
        assert_eq!(gaps(&positions(&[0, 1, 2])), 0);
        assert_eq!(gaps(&positions(&[0, 2, 5])), 3);
    }

    #[test]
    fn gaps_tolerates_repeated_positions() {
        assert_eq!(gaps(&positions(&[0, 0, 0, 1])), 0);
    }
}
