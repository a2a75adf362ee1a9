// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;

/// Max number of names a protection list will hold.
pub const MAX_PROTECTED_NAMES: usize = 25;

const DEFAULT_DEBUG_LEVEL: u32 = 2;

// Kill processes with badness 0 and up below 6 MiB free, 1 and up below
// 8 MiB, 6 and up below 16 MiB, 12 and up below 64 MiB (4 KiB pages).
const DEFAULT_ADJ: [i32; 4] = [0, 1, 6, 12];
const DEFAULT_MINFREE: [u64; 4] = [3 * 512, 2 * 1024, 4 * 1024, 16 * 1024];

/// One row of the kill threshold table: processes with a badness value of
/// `min_priority` or higher may be killed once both free memory and file
/// cache drop below `min_free_pages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdEntry {
    pub min_priority: i32,
    pub min_free_pages: u64,
}

/// A set of process names to preserve from killing.
#[derive(Debug, Clone, Default)]
pub struct ProtectionList {
    pub enabled: bool,
    names: Vec<String>,
}

impl ProtectionList {
    pub fn new(enabled: bool, mut names: Vec<String>) -> Self {
        names.truncate(MAX_PROTECTED_NAMES);
        Self { enabled, names }
    }

    /// A configured name matches if it occurs anywhere in the process name,
    /// so renamed or partially matching binaries stay protected.
    pub fn matches(&self, proc_name: &str) -> bool {
        self.enabled
            && !self.names.is_empty()
            && self.names.iter().any(|name| proc_name.contains(name.as_str()))
    }
}

/// Process-wide reclaim policy configuration. Owned by the scheduler and
/// replaced wholesale between scans, never mutated during one.
#[derive(Debug, Clone)]
pub struct ReclaimConfig {
    /// Kill thresholds, ascending by free page count.
    pub thresholds: Vec<ThresholdEntry>,
    /// User processes to preserve from killing.
    pub protected_procs: ProtectionList,
    /// System processes to preserve from killing.
    pub protected_sysprocs: ProtectionList,
    /// Scan log verbosity. Observability only, no behavioral effect.
    pub debug_level: u32,
}

impl ReclaimConfig {
    /// Pair the badness and free-page tables index-wise. The tables are
    /// truncated to the shorter length so no entry is evaluated without
    /// both its threshold and its badness value.
    pub fn from_tables(adj: &[i32], minfree: &[u64]) -> Self {
        let thresholds = adj
            .iter()
            .zip(minfree.iter())
            .map(|(&min_priority, &min_free_pages)| ThresholdEntry {
                min_priority,
                min_free_pages,
            })
            .collect();
        Self {
            thresholds,
            protected_procs: ProtectionList::default(),
            protected_sysprocs: ProtectionList::default(),
            debug_level: DEFAULT_DEBUG_LEVEL,
        }
    }
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self::from_tables(&DEFAULT_ADJ, &DEFAULT_MINFREE)
    }
}

/// Parse a comma separated list of badness values in ascending order, e.g.
/// "0,8".
pub fn parse_adj_list(content: &str) -> Result<Vec<i32>> {
    parse_ascending_list(content)
}

/// Parse a comma separated list of free page counts in ascending order,
/// e.g. "1024,4096".
pub fn parse_minfree_list(content: &str) -> Result<Vec<u64>> {
    parse_ascending_list(content)
}

fn parse_ascending_list<T>(content: &str) -> Result<Vec<T>>
where
    T: std::str::FromStr + PartialOrd + Copy,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let values = content
        .trim()
        .split(',')
        .map(|token| {
            token
                .trim()
                .parse::<T>()
                .with_context(|| format!("Couldn't parse \"{}\" in list", token))
        })
        .collect::<Result<Vec<T>>>()?;
    for pair in values.windows(2) {
        if pair[1] < pair[0] {
            bail!("List \"{}\" is not in ascending order", content.trim());
        }
    }
    Ok(values)
}

/// Parse a comma separated list of process names. Empty entries are
/// dropped; anything past the name cap is ignored.
pub fn parse_name_list(content: &str) -> Vec<String> {
    content
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .take(MAX_PROTECTED_NAMES)
        .map(str::to_string)
        .collect()
}
