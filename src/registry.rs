// File: registry.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::settings::{FlagStore, PERMUTE_PREFIX};
use crate::technique::{Technique, TechniqueId};
use log::debug;
use std::sync::Arc;

/// Base techniques registered by default, in probing order.
pub const DEFAULT_TECHNIQUES: [Technique; 27] = [
    // core
    Technique::Vanilla,
    Technique::DualChunk,
    Technique::BadWrap,
    Technique::Space1,
    Technique::BadSetupLf,
    Technique::Gareth1,
    // niche
    Technique::SpaceJoin1,
    Technique::Space2,
    Technique::NamePrefix1,
    Technique::ValuePrefix1,
    Technique::NoSpace1,
    Technique::CommaCow,
    Technique::CowComma,
    Technique::ContentEnc,
    Technique::LineWrapped1,
    Technique::Quoted,
    Technique::Aposed,
    Technique::BadSetupCr,
    Technique::VertWrap,
    Technique::TabWrap,
    Technique::LazyGrep,
    Technique::MultiCase,
    Technique::ZeroDWrap,
    Technique::ZeroDSpam,
    Technique::RevDualChunk,
    Technique::Nested,
    Technique::Chunky,
];

pub const PARAMETERIZED_FAMILIES: [Technique; 3] =
    [Technique::SpaceFix1, Technique::Prefix1, Technique::Suffix1];

/// Ordered catalog of techniques with an on/off toggle per entry.
///
/// Toggles live in the shared [`FlagStore`] under `permute: <id>` and are read
/// on every query, so edits made while a scan runs take effect immediately.
pub struct PermutationRegistry {
    ids: Vec<TechniqueId>,
    settings: Arc<dyn FlagStore>,
}

impl PermutationRegistry {
    pub fn new(settings: Arc<dyn FlagStore>) -> Self {
        Self {
            ids: Vec::new(),
            settings,
        }
    }

    pub fn with_defaults(settings: Arc<dyn FlagStore>, special_chars: &[u8]) -> Self {
        let mut registry = Self::new(settings);
        for technique in DEFAULT_TECHNIQUES {
            registry.register(technique.into());
        }
        for family in PARAMETERIZED_FAMILIES {
            for &c in special_chars {
                registry.register(TechniqueId::with_param(family, c));
            }
        }
        debug!("Registered {} permutations", registry.len());
        registry
    }

    pub fn toggle_name(id: &TechniqueId) -> String {
        format!("{}{}", PERMUTE_PREFIX, id)
    }

    /// Appends `id` and registers its toggle (enabled). Duplicates are ignored.
    pub fn register(&mut self, id: TechniqueId) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.settings.register_flag(&Self::toggle_name(&id), true);
        self.ids.push(id);
        true
    }

    pub fn ids(&self) -> &[TechniqueId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_enabled(&self, id: &TechniqueId) -> bool {
        self.settings.get_flag(&Self::toggle_name(id))
    }

    pub fn set_enabled(&self, id: &TechniqueId, enabled: bool) {
        self.settings.set_flag(&Self::toggle_name(id), enabled);
    }

    /// Disables everything not in `allowed`.
    pub fn restrict_to(&self, allowed: &[TechniqueId]) {
        for id in &self.ids {
            self.set_enabled(id, allowed.contains(id));
        }
    }

    pub fn enabled(&self) -> Vec<TechniqueId> {
        self.ids
            .iter()
            .filter(|id| self.is_enabled(id))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::technique_engine::DEFAULT_SPECIAL_CHARS;

    #[test]
    fn test_default_catalog_order_and_size() {
        let registry =
            PermutationRegistry::with_defaults(Arc::new(Settings::new()), &DEFAULT_SPECIAL_CHARS);
        assert_eq!(
            registry.len(),
            DEFAULT_TECHNIQUES.len() + 3 * DEFAULT_SPECIAL_CHARS.len()
        );
        assert_eq!(registry.ids()[0], TechniqueId::plain(Technique::Vanilla));
        assert_eq!(
            registry.ids()[DEFAULT_TECHNIQUES.len()],
            TechniqueId::with_param(Technique::SpaceFix1, DEFAULT_SPECIAL_CHARS[0])
        );
        assert_eq!(
            registry.ids().last().copied(),
            Some(TechniqueId::with_param(
                Technique::Suffix1,
                DEFAULT_SPECIAL_CHARS[DEFAULT_SPECIAL_CHARS.len() - 1]
            ))
        );
    }

    #[test]
    fn test_register_creates_enabled_toggle() {
        let settings = Arc::new(Settings::new());
        let mut registry = PermutationRegistry::new(settings.clone());
        let id = TechniqueId::with_param(Technique::Prefix1, 9);
        assert!(registry.register(id));
        assert!(!registry.register(id));
        assert_eq!(registry.len(), 1);
        assert!(settings.get_flag("permute: prefix1:9"));
    }

    #[test]
    fn test_toggles_read_through_store() {
        let settings = Arc::new(Settings::new());
        let registry = PermutationRegistry::with_defaults(settings.clone(), &[0x09]);
        let id = TechniqueId::plain(Technique::Space1);
        assert!(registry.is_enabled(&id));
        settings.set_flag("permute: space1", false);
        assert!(!registry.is_enabled(&id));
        assert!(!registry.enabled().contains(&id));
    }

    #[test]
    fn test_restrict_to() {
        let registry = PermutationRegistry::with_defaults(Arc::new(Settings::new()), &[0x20]);
        let keep = vec![TechniqueId::plain(Technique::Vanilla)];
        registry.restrict_to(&keep);
        assert_eq!(registry.enabled(), keep);
    }
}
