// File: settings.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::ProbeError;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

pub const CONVERT_GET_TO_POST: &str = "convert GET to POST";
pub const SWAP_DASH_WITH_UNDERSCORE: &str = "globally swap - with _";
pub const RISKY_MODE: &str = "risky mode";
pub const PAD_EVERYTHING: &str = "pad everything";
pub const SKIP_VULNERABLE_HOSTS: &str = "skip vulnerable hosts";
pub const SKIP_OBSOLETE_PERMUTATIONS: &str = "skip obsolete permutations";
pub const SKIP_STRAIGHT_TO_POC: &str = "skip straight to poc";
pub const PERMUTE_PREFIX: &str = "permute: ";

/// Process-wide boolean flags. Implementations must be safe to share between
/// concurrently running scan units.
pub trait FlagStore: Send + Sync {
    /// Registers `name` with `default` unless it already exists.
    fn register_flag(&self, name: &str, default: bool);
    fn get_flag(&self, name: &str) -> bool;
    fn set_flag(&self, name: &str, value: bool);
}

#[derive(Debug, Default)]
pub struct Settings {
    flags: RwLock<HashMap<String, bool>>,
}

impl Settings {
    pub fn new() -> Self {
        let settings = Self::default();
        settings.register_flag(CONVERT_GET_TO_POST, true);
        settings.register_flag(SWAP_DASH_WITH_UNDERSCORE, false);
        settings.register_flag(RISKY_MODE, false);
        settings.register_flag(PAD_EVERYTHING, false);
        settings.register_flag(SKIP_VULNERABLE_HOSTS, false);
        settings.register_flag(SKIP_OBSOLETE_PERMUTATIONS, false);
        settings.register_flag(SKIP_STRAIGHT_TO_POC, false);
        settings
    }

    /// Loads flag overrides from a JSON object of `"flag name": bool` pairs.
    pub fn load_overrides(&self, path: &Path) -> Result<usize, ProbeError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ProbeError::Config(format!("{}: {}", path.display(), e)))?;
        self.apply_json(&raw)
    }

    pub fn apply_json(&self, raw: &str) -> Result<usize, ProbeError> {
        let overrides: HashMap<String, bool> = serde_json::from_str(raw)
            .map_err(|e| ProbeError::Config(format!("invalid settings file: {}", e)))?;
        let count = overrides.len();
        for (name, value) in overrides {
            debug!("Settings override: {} = {}", name, value);
            self.set_flag(&name, value);
        }
        Ok(count)
    }

    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        match self.flags.read() {
            Ok(flags) => flags.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}

impl FlagStore for Settings {
    fn register_flag(&self, name: &str, default: bool) {
        let mut flags = self.flags.write().unwrap_or_else(|e| e.into_inner());
        flags.entry(name.to_string()).or_insert(default);
    }

    fn get_flag(&self, name: &str) -> bool {
        let flags = self.flags.read().unwrap_or_else(|e| e.into_inner());
        flags.get(name).copied().unwrap_or(false)
    }

    fn set_flag(&self, name: &str, value: bool) {
        let mut flags = self.flags.write().unwrap_or_else(|e| e.into_inner());
        flags.insert(name.to_string(), value);
    }
}
