use anyhow::{Context, Result};
use mmdb_reader::Reader;
use std::path::PathBuf;

use crate::cli_utils::{format_number, format_unix_timestamp};

pub fn cmd_inspect(database: PathBuf, json_output: bool) -> Result<()> {
    let reader = Reader::open(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;
    let metadata = reader.metadata()?;

    if json_output {
        let mut output = metadata.to_json();
        output["file"] = serde_json::json!(database.display().to_string());
        output["search_tree_size"] = serde_json::json!(metadata.search_tree_size());
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database:      {}", database.display());
    println!("Type:          {}", metadata.database_type);
    println!("IP version:    {}", metadata.ip_version);
    println!("Record size:   {} bits", metadata.record_size.bits());
    println!("Nodes:         {}", format_number(metadata.node_count as usize));
    println!(
        "Tree size:     {} bytes",
        format_number(metadata.search_tree_size())
    );
    println!(
        "Format:        {}.{}",
        metadata.binary_format_major_version, metadata.binary_format_minor_version
    );
    println!("Built:         {}", format_unix_timestamp(metadata.build_epoch));

    if !metadata.languages.is_empty() {
        println!("Languages:     {}", metadata.languages.join(", "));
    }

    if !metadata.description.is_empty() {
        println!();
        println!("Description:");
        for (lang, text) in &metadata.description {
            println!("  {}: {}", lang, text);
        }
    }

    Ok(())
}
