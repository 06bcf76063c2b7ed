use anyhow::{Context, Result};
use mmdb_reader::{IpVersion, Reader};
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::cli_utils::format_cidr;

pub fn cmd_lookup(database: PathBuf, ips: Vec<String>, prefix: bool, quiet: bool) -> Result<()> {
    let reader = Reader::open(&database)
        .with_context(|| format!("Failed to load database: {}", database.display()))?;
    let ip_version = reader.metadata()?.ip_version;

    let mut results = Vec::with_capacity(ips.len());
    let mut all_found = true;

    for ip in &ips {
        let (record, prefix_len) = reader
            .get_with_prefix_len(ip)
            .with_context(|| format!("Lookup failed for: {}", ip))?;
        all_found &= record.is_some();

        let mut result = json!({
            "ip": ip,
            "data": record.as_ref().map(|r| r.to_json()),
        });
        if prefix {
            result["network"] = json!(format_cidr(&network_address(ip, ip_version), prefix_len));
            result["prefix_len"] = json!(prefix_len);
        }
        results.push(result);
    }

    if !quiet {
        println!("{}", serde_json::to_string_pretty(&json!(results))?);
    }

    std::process::exit(if all_found { 0 } else { 1 });
}

/// The address the reader actually walked: IPv4-mapped queries against an
/// IPv4 database are looked up (and reported) as IPv4
fn network_address(ip: &str, ip_version: IpVersion) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) if ip_version == IpVersion::V4 => v6
            .to_ipv4_mapped()
            .map(|v4| v4.to_string())
            .unwrap_or_else(|| ip.to_string()),
        _ => ip.to_string(),
    }
}
