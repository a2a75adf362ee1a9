// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;

/// Struct to hold parsed /proc/vmstat data, only contains used fields.
#[derive(Debug, Default, Clone)]
pub struct Vmstat {
    pub nr_free_pages: u64,
    pub nr_file_pages: u64,
    pub nr_shmem: u64,
    pub nr_active_anon: u64,
    pub nr_inactive_anon: u64,
    pub nr_active_file: u64,
    pub nr_inactive_file: u64,
}

impl Vmstat {
    /// Load /proc/vmstat and parse it.
    pub fn load() -> io::Result<Self> {
        let reader = File::open("/proc/vmstat")?;
        let reader = BufReader::new(reader);
        Self::parse(reader)
    }

    fn parse<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut result = Self::default();
        for line in reader.lines() {
            let line = line?;
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else {
                continue;
            };
            let field = match key {
                "nr_free_pages" => &mut result.nr_free_pages,
                "nr_file_pages" => &mut result.nr_file_pages,
                "nr_shmem" => &mut result.nr_shmem,
                "nr_active_anon" => &mut result.nr_active_anon,
                "nr_inactive_anon" => &mut result.nr_inactive_anon,
                "nr_active_file" => &mut result.nr_active_file,
                "nr_inactive_file" => &mut result.nr_inactive_file,
                _ => {
                    continue;
                }
            };
            let Some(value) = tokens.next() else {
                continue;
            };
            let Ok(value) = value.parse::<u64>() else {
                continue;
            };
            *field = value;
        }
        Ok(result)
    }

    /// Pages free for allocation.
    pub fn other_free(&self) -> u64 {
        self.nr_free_pages
    }

    /// File-backed pages that can be dropped under pressure. Shared memory
    /// is file-backed but not reclaimable, so it is excluded.
    pub fn other_file(&self) -> u64 {
        self.nr_file_pages.saturating_sub(self.nr_shmem)
    }

    /// Pages on the active and inactive LRU lists, anonymous and
    /// file-backed. This is the reclaimable estimate reported to the
    /// trigger source on every scan.
    pub fn reclaimable_pages(&self) -> u64 {
        self.nr_active_anon
            .saturating_add(self.nr_inactive_anon)
            .saturating_add(self.nr_active_file)
            .saturating_add(self.nr_inactive_file)
    }
}
