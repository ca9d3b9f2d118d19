pub mod classify;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Canonical stem names, in presentation order.
///
/// The display strings are a versioned vocabulary: job records, exports and
/// any formatting layer rely on them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stem {
    LeadVocals,
    BackingVocals,
    Drums,
    Bass,
    Guitar,
    Piano,
    OtherInstruments,
}

impl Stem {
    pub const ALL: [Stem; 7] = [
        Stem::LeadVocals,
        Stem::BackingVocals,
        Stem::Drums,
        Stem::Bass,
        Stem::Guitar,
        Stem::Piano,
        Stem::OtherInstruments,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::LeadVocals => "Lead Vocals",
            Self::BackingVocals => "Backing Vocals",
            Self::Drums => "Drums",
            Self::Bass => "Bass",
            Self::Guitar => "Guitar",
            Self::Piano => "Piano",
            Self::OtherInstruments => "Other Instruments",
        }
    }

    /// Look up a canonical name (exact match).
    pub fn from_name(name: &str) -> Option<Stem> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }
}

impl fmt::Display for Stem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Final mapping from canonical stem to the file holding it.
///
/// Only populated stems are present; there is no way to insert an empty
/// reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StemMap {
    entries: BTreeMap<Stem, PathBuf>,
}

impl StemMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a stem. Empty paths are ignored and reported as `false`.
    pub fn insert(&mut self, stem: Stem, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return false;
        }
        self.entries.insert(stem, path);
        true
    }

    pub fn get(&self, stem: Stem) -> Option<&Path> {
        self.entries.get(&stem).map(PathBuf::as_path)
    }

    pub fn contains(&self, stem: Stem) -> bool {
        self.entries.contains_key(&stem)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Stem, &Path)> {
        self.entries.iter().map(|(s, p)| (*s, p.as_path()))
    }

    /// Serialize as a JSON object keyed by canonical name.
    pub fn to_json(&self) -> String {
        let obj: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|(s, p)| {
                (
                    s.name().to_string(),
                    serde_json::Value::String(p.to_string_lossy().into_owned()),
                )
            })
            .collect();
        serde_json::Value::Object(obj).to_string()
    }

    /// Parse the JSON written by [`StemMap::to_json`].
    ///
    /// Keys outside the canonical vocabulary and empty references are dropped.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, String> = serde_json::from_str(json)?;
        let mut map = Self::new();
        for (name, path) in raw {
            match Stem::from_name(&name) {
                Some(stem) => {
                    map.insert(stem, path);
                }
                None => log::warn!("Ignoring non-canonical stem name in record: {}", name),
            }
        }
        Ok(map)
    }
}
