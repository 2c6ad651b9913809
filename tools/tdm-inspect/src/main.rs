// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! tdm-inspect - look into TDM schemas and payloads.
//!
//! ```text
//! tdm-inspect gen-schema -o thermostat.toml
//! tdm-inspect validate thermostat.toml
//! tdm-inspect path thermostat.toml zones/4/setpoint
//! tdm-inspect decode thermostat.toml 1524010103... --path zones
//! tdm-inspect events 1615240101...
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tdm::json::{render_event_list, tlv_to_json, trait_data_to_json};
use tdm::{SchemaDefinition, SchemaEngine, TdmConfig, TlvReader};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "tdm-inspect")]
#[command(about = "Inspect TDM schemas, property paths and TLV payloads")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// TDM configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a textual property path
    Path {
        /// Schema description (TOML)
        #[arg(value_name = "SCHEMA")]
        schema: PathBuf,

        /// Path such as "zones/4/setpoint"
        path: String,
    },

    /// Decode hex-encoded trait data to JSON
    Decode {
        /// Schema description (TOML)
        #[arg(value_name = "SCHEMA")]
        schema: PathBuf,

        /// Hex-encoded TLV element
        hex: String,

        /// Property path the data is rooted at
        #[arg(long, default_value = "")]
        path: String,

        /// Ignore the schema and print raw tags
        #[arg(long)]
        raw: bool,
    },

    /// Decode a hex-encoded event list to JSON
    Events {
        /// Hex-encoded TLV array of events
        hex: String,
    },

    /// Write the example schema description
    GenSchema {
        /// Output file (stdout if omitted)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Check that a schema description builds
    Validate {
        /// Schema description (TOML)
        #[arg(value_name = "SCHEMA")]
        schema: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))
        .context("invalid --log-level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => TdmConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TdmConfig::default(),
    };
    debug!("config: {:?}", config);

    match cli.command {
        Commands::Path { schema, path } => cmd_path(&load_schema(&schema, &config)?, &path),
        Commands::Decode {
            schema,
            hex,
            path,
            raw,
        } => cmd_decode(&load_schema(&schema, &config)?, &hex, &path, raw),
        Commands::Events { hex } => cmd_events(&hex),
        Commands::GenSchema { output } => cmd_gen_schema(output.as_deref()),
        Commands::Validate { schema } => cmd_validate(&schema, &config),
    }
}

fn load_schema(path: &Path, config: &TdmConfig) -> anyhow::Result<SchemaEngine> {
    let definition = SchemaDefinition::from_file(path)
        .with_context(|| format!("reading schema {}", path.display()))?;
    let schema = definition
        .build(config.schema_compliance)
        .with_context(|| format!("building schema {}", definition.name))?;
    info!(
        "schema '{}' profile 0x{:08x}: {} nodes",
        schema.name(),
        schema.profile_id(),
        schema.node_count()
    );
    Ok(schema)
}

/// Parse hex text; whitespace and an optional `0x` prefix are ignored.
fn parse_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    let digits: String = text.split_whitespace().collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);
    if !digits.is_ascii() {
        bail!("non-ASCII character in hex input");
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    digits
        .as_bytes()
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .with_context(|| format!("invalid hex at offset {}", i * 2))
        })
        .collect()
}

fn first_element(bytes: &[u8]) -> anyhow::Result<TlvReader<'_>> {
    let mut reader = TlvReader::new(bytes);
    reader.next().context("empty TLV input")?;
    Ok(reader)
}

fn describe_path(schema: &SchemaEngine, path: &str) -> anyhow::Result<serde_json::Value> {
    let handle = schema.map_text_path_to_handle(path)?;
    let tags: Vec<String> = schema
        .path_tags(handle)?
        .iter()
        .map(ToString::to_string)
        .collect();
    let kind = if schema.is_dictionary(handle) {
        "dictionary"
    } else if schema.is_leaf(handle) {
        "leaf"
    } else {
        "structure"
    };
    Ok(serde_json::json!({
        "path": schema.handle_to_text_path(handle)?,
        "handle": format!("0x{:08x}", handle.raw()),
        "schema_handle": handle.schema_handle(),
        "dictionary_key": handle.dictionary_key(),
        "depth": schema.depth(handle),
        "kind": kind,
        "optional": schema.is_optional(handle),
        "nullable": schema.is_nullable(handle),
        "ephemeral": schema.is_ephemeral(handle),
        "tags": tags,
    }))
}

fn cmd_path(schema: &SchemaEngine, path: &str) -> anyhow::Result<()> {
    let description = describe_path(schema, path)?;
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

fn cmd_decode(schema: &SchemaEngine, hex: &str, path: &str, raw: bool) -> anyhow::Result<()> {
    let bytes = parse_hex(hex)?;
    let reader = first_element(&bytes)?;
    let value = if raw {
        tlv_to_json(&reader)?
    } else {
        let handle = schema.map_text_path_to_handle(path)?;
        trait_data_to_json(schema, handle, &reader)?
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_events(hex: &str) -> anyhow::Result<()> {
    let bytes = parse_hex(hex)?;
    let events = render_event_list(&first_element(&bytes)?)?;
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}

fn cmd_gen_schema(output: Option<&Path>) -> anyhow::Result<()> {
    let text = toml::to_string_pretty(&SchemaDefinition::example())?;
    match output {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            println!("[OK] wrote {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn cmd_validate(path: &Path, config: &TdmConfig) -> anyhow::Result<()> {
    let schema = load_schema(path, config)?;
    println!(
        "[OK] {}: '{}' profile 0x{:08x}, {} nodes, depth {}, versions {}..={}",
        path.display(),
        schema.name(),
        schema.profile_id(),
        schema.node_count(),
        schema.tree_depth(),
        schema.min_version(),
        schema.max_version()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdm::{SchemaCompliance, Tag, TlvWriter};

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x0a ff").expect("hex"), vec![0x0a, 0xff]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
        assert!(parse_hex("aéb").is_err());
        assert!(parse_hex("éé").is_err());
    }

    #[test]
    fn test_gen_schema_validates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("thermostat.toml");
        cmd_gen_schema(Some(&path)).expect("gen");
        cmd_validate(&path, &TdmConfig::default()).expect("validate");
    }

    #[test]
    fn test_describe_path() {
        let schema = SchemaDefinition::example()
            .build(SchemaCompliance::Strict)
            .expect("schema");
        let description = describe_path(&schema, "zones/4/setpoint").expect("describe");
        assert_eq!(description["dictionary_key"], 4);
        assert_eq!(description["depth"], 3);
        assert_eq!(description["nullable"], true);
        assert!(describe_path(&schema, "nope").is_err());
    }

    #[test]
    fn test_decode_with_schema() {
        let schema = SchemaDefinition::example()
            .build(SchemaCompliance::Strict)
            .expect("schema");
        let mut writer = TlvWriter::new();
        writer.put_string(Tag::Anonymous, "heat").expect("mode");
        let bytes = writer.finalize().expect("finalize");
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        cmd_decode(&schema, &hex, "mode", false).expect("decode");
    }
}
