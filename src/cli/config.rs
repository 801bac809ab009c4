//! CLI configuration module
//!
//! Merges an optional JSON scenario file with command-line flags.

use crate::cli::args::CliArgs;
use crate::error::{Result, RingError};
use crate::storage::backend::validate_name;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default ring used when neither the file nor the flags name any nodes
pub const DEFAULT_NODES: [&str; 5] = ["a", "b", "c", "d", "e"];

/// Default number of parts for a seeded file
pub const DEFAULT_PARTS: usize = 5;

/// A record to store, by logical name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSpec {
    pub name: String,
    pub value: String,
}

/// A file to seed across the ring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub base_name: Option<String>,
    #[serde(default)]
    pub parts: Option<usize>,
}

/// On-disk scenario description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioFile {
    pub nodes: Vec<String>,
    pub storage_dir: Option<PathBuf>,
    pub records: Vec<RecordSpec>,
    pub seed: Option<SeedSpec>,
    pub manifest_out: Option<PathBuf>,
    pub leave: Vec<String>,
    pub churn: Option<usize>,
    pub rng_seed: Option<u64>,
}

impl ScenarioFile {
    /// Parse a scenario from JSON bytes
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Load a scenario file
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            RingError::config_error_with_field(format!("Failed to read {}: {}", path.display(), e), "config")
        })?;
        Self::from_slice(&data).map_err(|e| e.with_context(path.display().to_string()))
    }
}

/// Resolved settings for one scenario run
#[derive(Debug, Clone)]
pub struct Config {
    /// Node names, joined in order through the first
    pub nodes: Vec<String>,
    /// Directory backend root, or memory when `None`
    pub storage_dir: Option<PathBuf>,
    /// Records to store
    pub records: Vec<RecordSpec>,
    /// File to seed and its part count
    pub seed: Option<SeedSpec>,
    /// Where to save the seed manifest
    pub manifest_out: Option<PathBuf>,
    /// Nodes to remove after storing
    pub leave: Vec<String>,
    /// Random join/leave rounds
    pub churn: usize,
    /// Churn RNG seed
    pub rng_seed: u64,
    /// Quiet mode
    pub quiet: bool,
}

impl Config {
    /// Create configuration from CLI arguments over an optional scenario file
    pub fn from_args(args: &CliArgs, file: Option<ScenarioFile>) -> Result<Self> {
        let file = file.unwrap_or_default();

        let nodes = if !args.nodes.is_empty() {
            args.nodes.clone()
        } else if !file.nodes.is_empty() {
            file.nodes
        } else {
            DEFAULT_NODES.iter().map(|s| s.to_string()).collect()
        };

        let mut records = file.records;
        for raw in &args.records {
            records.push(parse_record(raw)?);
        }

        let seed = match (&args.seed_file, file.seed) {
            (Some(path), _) => Some(SeedSpec {
                path: path.clone(),
                base_name: args.seed_name.clone(),
                parts: args.parts,
            }),
            (None, Some(mut spec)) => {
                spec.base_name = args.seed_name.clone().or(spec.base_name);
                spec.parts = args.parts.or(spec.parts);
                Some(spec)
            }
            (None, None) => None,
        };

        let leave = if args.leaves.is_empty() { file.leave } else { args.leaves.clone() };

        Ok(Self {
            nodes,
            storage_dir: args.storage_dir.clone().or(file.storage_dir),
            records,
            seed,
            manifest_out: args.manifest_out.clone().or(file.manifest_out),
            leave,
            churn: args.churn.or(file.churn).unwrap_or(0),
            rng_seed: args.rng_seed.or(file.rng_seed).unwrap_or(0),
            quiet: args.quiet,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(RingError::config_error_with_field("At least one node is required", "nodes"));
        }

        let mut seen = HashSet::new();
        for name in &self.nodes {
            validate_name(name).map_err(|e| e.with_context(format!("node '{}'", name)))?;
            if !seen.insert(name.as_str()) {
                return Err(RingError::config_error_with_field(format!("Duplicate node name '{}'", name), "nodes"));
            }
        }

        let mut leaving = HashSet::new();
        for name in &self.leave {
            if !seen.contains(name.as_str()) {
                return Err(RingError::config_error_with_field(format!("Cannot remove unknown node '{}'", name), "leave"));
            }
            if !leaving.insert(name.as_str()) {
                return Err(RingError::config_error_with_field(format!("Node '{}' removed twice", name), "leave"));
            }
        }
        if leaving.len() >= self.nodes.len() {
            return Err(RingError::config_error_with_field("At least one node must remain in the ring", "leave"));
        }

        for record in &self.records {
            validate_name(&record.name).map_err(|e| e.with_context(format!("record '{}'", record.name)))?;
        }

        if let Some(seed) = &self.seed {
            if seed.parts == Some(0) {
                return Err(RingError::config_error_with_field("parts must be at least 1", "parts"));
            }
            if seed.path.as_os_str().is_empty() {
                return Err(RingError::config_error_with_field("seed file path cannot be empty", "seed_file"));
            }
        }

        if let Some(dir) = &self.storage_dir {
            if dir.as_os_str().is_empty() {
                return Err(RingError::config_error_with_field("storage_dir cannot be empty", "storage_dir"));
            }
        }

        Ok(())
    }

    /// Part count for the seeded file
    pub fn seed_parts(&self) -> usize {
        self.seed.as_ref().and_then(|s| s.parts).unwrap_or(DEFAULT_PARTS)
    }

    /// Base name for the seeded parts
    pub fn seed_base_name(&self) -> Option<String> {
        let seed = self.seed.as_ref()?;
        seed.base_name.clone().or_else(|| {
            seed.path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string())
        })
    }

    /// Whether churn rounds were requested
    pub fn is_churn_enabled(&self) -> bool {
        self.churn > 0
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

/// Parse `NAME=VALUE`
fn parse_record(raw: &str) -> Result<RecordSpec> {
    let (name, value) = raw.split_once('=').ok_or_else(|| {
        RingError::config_error_with_field(format!("Expected NAME=VALUE, got '{}'", raw), "store")
    })?;
    Ok(RecordSpec {
        name: name.trim().to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["chord-ring-sim"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(&args(&[]), None).unwrap();
        assert_eq!(config.nodes, vec!["a", "b", "c", "d", "e"]);
        assert!(config.storage_dir.is_none());
        assert!(config.seed.is_none());
        assert_eq!(config.churn, 0);
        assert!(!config.is_churn_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_override_file() {
        let file = ScenarioFile {
            nodes: vec!["x".into(), "y".into()],
            churn: Some(3),
            leave: vec!["x".into()],
            ..Default::default()
        };
        let config = Config::from_args(&args(&["--nodes", "p,q,r", "--leave", "q"]), Some(file)).unwrap();
        assert_eq!(config.nodes, vec!["p", "q", "r"]);
        assert_eq!(config.leave, vec!["q"]);
        assert_eq!(config.churn, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scenario_file_parse() {
        let json = br#"{
            "nodes": ["a", "b", "c"],
            "records": [{"name": "test_file", "value": "this is a test file"}],
            "seed": {"path": "clip.mp4", "parts": 4},
            "leave": ["b"]
        }"#;
        let file = ScenarioFile::from_slice(json).unwrap();
        let config = Config::from_args(&args(&[]), Some(file)).unwrap();

        assert_eq!(config.records.len(), 1);
        assert_eq!(config.seed_parts(), 4);
        assert_eq!(config.seed_base_name().as_deref(), Some("clip"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scenario_file_invalid_json() {
        assert!(ScenarioFile::from_slice(b"{ nodes: ").is_err());
    }

    #[test]
    fn test_parse_record() {
        let config = Config::from_args(&args(&["--store", "k1=a=b"]), None).unwrap();
        assert_eq!(config.records[0], RecordSpec { name: "k1".into(), value: "a=b".into() });

        assert!(Config::from_args(&args(&["--store", "novalue"]), None).is_err());
    }

    #[test]
    fn test_validate_duplicate_nodes() {
        let config = Config::from_args(&args(&["--nodes", "a,b,a"]), None).unwrap();
        assert!(matches!(config.validate(), Err(RingError::ConfigError { .. })));
    }

    #[test]
    fn test_validate_leave_everyone() {
        let config = Config::from_args(&args(&["--nodes", "a,b", "--leave", "a", "--leave", "b"]), None).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_leave() {
        let config = Config::from_args(&args(&["--leave", "zz"]), None).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_parts() {
        let config = Config::from_args(&args(&["--seed-file", "x.bin", "--parts", "0"]), None).unwrap();
        assert!(config.validate().is_err());
    }
}
