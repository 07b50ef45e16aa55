// File: technique.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Base names of the framing obfuscations. Order here is the default probing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Technique {
    Vanilla,
    DualChunk,
    BadWrap,
    Space1,
    BadSetupLf,
    Gareth1,
    SpaceJoin1,
    Space2,
    NamePrefix1,
    ValuePrefix1,
    NoSpace1,
    CommaCow,
    CowComma,
    ContentEnc,
    LineWrapped1,
    Quoted,
    Aposed,
    BadSetupCr,
    VertWrap,
    TabWrap,
    LazyGrep,
    MultiCase,
    ZeroDWrap,
    ZeroDSpam,
    RevDualChunk,
    Nested,
    Chunky,
    ReverseVanilla,
    SpaceFix1,
    Prefix1,
    Suffix1,
}

impl Technique {
    pub const ALL: [Technique; 31] = [
        Technique::Vanilla,
        Technique::DualChunk,
        Technique::BadWrap,
        Technique::Space1,
        Technique::BadSetupLf,
        Technique::Gareth1,
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
        Technique::ReverseVanilla,
        Technique::SpaceFix1,
        Technique::Prefix1,
        Technique::Suffix1,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Technique::Vanilla => "vanilla",
            Technique::DualChunk => "dualchunk",
            Technique::BadWrap => "badwrap",
            Technique::Space1 => "space1",
            Technique::BadSetupLf => "badsetupLF",
            Technique::Gareth1 => "gareth1",
            Technique::SpaceJoin1 => "spacejoin1",
            Technique::Space2 => "space2",
            Technique::NamePrefix1 => "nameprefix1",
            Technique::ValuePrefix1 => "valueprefix1",
            Technique::NoSpace1 => "nospace1",
            Technique::CommaCow => "commaCow",
            Technique::CowComma => "cowComma",
            Technique::ContentEnc => "contentEnc",
            Technique::LineWrapped1 => "linewrapped1",
            Technique::Quoted => "quoted",
            Technique::Aposed => "aposed",
            Technique::BadSetupCr => "badsetupCR",
            Technique::VertWrap => "vertwrap",
            Technique::TabWrap => "tabwrap",
            Technique::LazyGrep => "lazygrep",
            Technique::MultiCase => "multiCase",
            Technique::ZeroDWrap => "0dwrap",
            Technique::ZeroDSpam => "0dspam",
            Technique::RevDualChunk => "revdualchunk",
            Technique::Nested => "nested",
            Technique::Chunky => "chunky",
            Technique::ReverseVanilla => "reversevanilla",
            Technique::SpaceFix1 => "spacefix1",
            Technique::Prefix1 => "prefix1",
            Technique::Suffix1 => "suffix1",
        }
    }

    /// Families that are only meaningful together with an injected byte.
    pub fn is_parameterized(&self) -> bool {
        matches!(
            self,
            Technique::SpaceFix1 | Technique::Prefix1 | Technique::Suffix1
        )
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Technique {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Technique::ALL
            .iter()
            .find(|t| t.name() == s)
            .copied()
            .ok_or_else(|| format!("unknown technique '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TechniqueId {
    pub technique: Technique,
    pub param: Option<u8>,
}

impl TechniqueId {
    pub fn plain(technique: Technique) -> Self {
        Self {
            technique,
            param: None,
        }
    }

    pub fn with_param(technique: Technique, param: u8) -> Self {
        Self {
            technique,
            param: Some(param),
        }
    }

    pub fn is(&self, technique: Technique) -> bool {
        self.technique == technique
    }
}

impl From<Technique> for TechniqueId {
    fn from(technique: Technique) -> Self {
        Self::plain(technique)
    }
}

impl fmt::Display for TechniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.param {
            Some(param) => write!(f, "{}:{}", self.technique, param),
            None => write!(f, "{}", self.technique),
        }
    }
}

impl FromStr for TechniqueId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            Some((name, param)) => {
                let technique: Technique = name.parse()?;
                let param: u8 = param
                    .parse()
                    .map_err(|_| format!("invalid parameter '{}' for {}", param, name))?;
                Ok(Self::with_param(technique, param))
            }
            None => Ok(Self::plain(s.parse()?)),
        }
    }
}

impl Serialize for TechniqueId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TechniqueId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The set of techniques active for one probe attempt. The scan driver always
/// builds single-entry configurations; an empty one means "no obfuscation".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    active: BTreeSet<TechniqueId>,
}

impl Configuration {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(id: TechniqueId) -> Self {
        let mut active = BTreeSet::new();
        active.insert(id);
        Self { active }
    }

    pub fn contains(&self, id: &TechniqueId) -> bool {
        self.active.contains(id)
    }

    pub fn has_technique(&self, technique: Technique) -> bool {
        self.active.iter().any(|id| id.is(technique))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TechniqueId> {
        self.active.iter()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn keys(&self) -> String {
        self.active
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl FromIterator<TechniqueId> for Configuration {
    fn from_iter<I: IntoIterator<Item = TechniqueId>>(iter: I) -> Self {
        Self {
            active: iter.into_iter().collect(),
        }
    }
}
