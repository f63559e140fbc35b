//! Memory parsing utilities for SLURM values.

/// Memory format variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFormat {
    /// User input and squeue format: "4G", "1000M", "4096K", "4096" (MB)
    Slurm,
    /// sacct format: "4Gn", "1000Mc" (with per-node/per-core suffix)
    SlurmSacct,
}

/// Parse memory string to megabytes.
///
/// Returns None for empty strings, placeholders, or unparsable values.
pub fn parse_memory_mb(s: &str, format: MemoryFormat) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || s == "-" {
        return None;
    }

    match format {
        MemoryFormat::Slurm => parse_slurm_memory(s),
        MemoryFormat::SlurmSacct => parse_slurm_memory(s.trim_end_matches(['n', 'c'])),
    }
}

fn parse_slurm_memory(s: &str) -> Option<u64> {
    let upper = s.to_ascii_uppercase();
    let upper = upper.strip_suffix('B').unwrap_or(upper.as_str());

    if let Some(stripped) = upper.strip_suffix('T') {
        stripped.parse::<u64>().ok().map(|v| v * 1024 * 1024)
    } else if let Some(stripped) = upper.strip_suffix('G') {
        stripped.parse::<u64>().ok().map(|v| v * 1024)
    } else if let Some(stripped) = upper.strip_suffix('M') {
        stripped.parse::<u64>().ok()
    } else if let Some(stripped) = upper.strip_suffix('K') {
        stripped.parse::<u64>().ok().map(|v| v / 1024)
    } else {
        // SLURM's default unit is megabytes
        upper.parse::<u64>().ok()
    }
}

/// Format megabytes the way sbatch accepts them.
pub fn format_memory_slurm(mb: u64) -> String {
    format!("{}M", mb)
}
