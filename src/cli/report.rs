//! Report display module
//!
//! Prints ring layouts, node indexes and run statistics for the scenario runner.

use std::io;
use std::time::{Duration, Instant};

use crate::dht::network::Network;
use crate::dht::node::{Node, NodeId};

/// Counters collected over a scenario run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioStats {
    /// Nodes currently in the network
    pub nodes: usize,
    /// Records currently indexed
    pub records: usize,
    /// Successful joins
    pub joins: usize,
    /// Successful leaves
    pub leaves: usize,
    /// Records relocated by joins and leaves
    pub migrated: usize,
    /// Bytes seeded
    pub seeded_bytes: u64,
}

impl ScenarioStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Format bytes to human readable string
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_index])
    }

    /// Format duration to human readable string
    pub fn format_duration(duration: Duration) -> String {
        let total_ms = duration.as_millis();
        if total_ms < 1000 {
            return format!("{}ms", total_ms);
        }
        let total_secs = duration.as_secs();
        let minutes = total_secs / 60;
        let seconds = total_secs % 60;
        if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

/// One line describing a node: name, short id, neighbours and anchor flag
pub fn describe_node(network: &Network, node: &Node) -> String {
    let neighbour = |id: &NodeId| {
        network
            .node_by_id(id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|_| "?".to_string())
    };
    format!(
        "{} id: {}.., neighbours: {}, {}, anchor: {}",
        node.name,
        node.id.short(),
        neighbour(&node.predecessor),
        neighbour(&node.successor),
        node.is_anchor
    )
}

/// One line listing a node's index as `(key, blob)` pairs
pub fn describe_index(node: &Node) -> String {
    let entries: Vec<String> = node
        .index
        .entries()
        .map(|e| format!("({}.., {})", e.key.short(), e.location.name))
        .collect();
    format!("{} memory: [{}]", node.name, entries.join(", "))
}

/// Scenario output for the CLI
pub struct ReportDisplay {
    /// Start time of the run
    start_time: Instant,
    /// Quiet mode (no output except errors)
    quiet: bool,
}

impl ReportDisplay {
    /// Create a new report display
    pub fn new(quiet: bool) -> Self {
        Self {
            start_time: Instant::now(),
            quiet,
        }
    }

    /// Print every ring member in ascending id order
    pub fn print_ring(&self, network: &Network, start: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let members = network
            .ring_members(start)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        println!("Ring ({} nodes):", members.len());
        for node in members {
            println!("  {}", describe_node(network, node));
        }
        Ok(())
    }

    /// Print each ring member's index
    pub fn print_indexes(&self, network: &Network, start: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let members = network
            .ring_members(start)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        println!("Indexes:");
        for node in members {
            println!("  {}", describe_index(node));
        }
        Ok(())
    }

    /// Print run statistics
    pub fn print_summary(&self, stats: &ScenarioStats) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        println!();
        println!("Scenario Complete!");
        println!("  Nodes: {}", stats.nodes);
        println!("  Records: {}", stats.records);
        println!("  Joins: {}", stats.joins);
        println!("  Leaves: {}", stats.leaves);
        println!("  Records migrated: {}", stats.migrated);
        if stats.seeded_bytes > 0 {
            println!("  Seeded: {}", ScenarioStats::format_bytes(stats.seeded_bytes));
        }
        println!("  Elapsed Time: {}", ScenarioStats::format_duration(self.start_time.elapsed()));

        Ok(())
    }

    /// Print a status message
    pub fn print_status(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        println!("{}", message);
        Ok(())
    }

    /// Print an error message
    pub fn print_error(&self, message: &str) -> io::Result<()> {
        eprintln!("Error: {}", message);
        Ok(())
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}
