//! Mapping raw separator outputs onto the canonical stem vocabulary.

use super::{Stem, StemMap};
use std::path::{Path, PathBuf};

/// Category a base-pass output falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// Full vocal track; becomes Lead Vocals directly or after refinement.
    Vocals,
    Instrument(Stem),
}

/// Ordered keyword table. Matching is a case-insensitive substring test on the
/// output's file name; the first matching row wins.
pub const KEYWORD_TABLE: &[(&str, Bucket)] = &[
    ("vocals", Bucket::Vocals),
    ("drums", Bucket::Instrument(Stem::Drums)),
    ("bass", Bucket::Instrument(Stem::Bass)),
    ("guitar", Bucket::Instrument(Stem::Guitar)),
    ("piano", Bucket::Instrument(Stem::Piano)),
    ("other", Bucket::Instrument(Stem::OtherInstruments)),
];

/// Classify one output by its file name. `None` means discard.
pub fn classify_output(path: &Path) -> Option<Bucket> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    KEYWORD_TABLE
        .iter()
        .find(|(keyword, _)| name.contains(keyword))
        .map(|(_, bucket)| *bucket)
}

/// Base-pass outputs sorted into buckets.
#[derive(Debug, Default)]
pub struct BaseClassification {
    /// The output that matched "vocals", if any.
    pub vocals: Option<PathBuf>,
    /// Instrument stems (never contains vocal entries).
    pub instruments: StemMap,
    /// Outputs that matched no keyword or duplicated a filled bucket.
    pub discarded: Vec<PathBuf>,
}

/// Sort base-pass outputs into buckets. The first output for a bucket wins.
pub fn classify_base(outputs: &[PathBuf]) -> BaseClassification {
    let mut result = BaseClassification::default();

    for output in outputs {
        match classify_output(output) {
            Some(Bucket::Vocals) if result.vocals.is_none() => {
                result.vocals = Some(output.clone());
            }
            Some(Bucket::Instrument(stem)) if !result.instruments.contains(stem) => {
                result.instruments.insert(stem, output.clone());
            }
            Some(_) => {
                log::debug!("Duplicate output for an already filled bucket: {}", output.display());
                result.discarded.push(output.clone());
            }
            None => {
                log::debug!("Output matches no stem keyword: {}", output.display());
                result.discarded.push(output.clone());
            }
        }
    }

    result
}

/// File-stem suffixes identifying the two outputs of the vocal model.
#[derive(Debug, Clone)]
pub struct RefinementRoles {
    pub lead_suffix: String,
    pub backing_suffix: String,
}

impl Default for RefinementRoles {
    fn default() -> Self {
        Self {
            lead_suffix: "(Vocals)".to_string(),
            backing_suffix: "(Instrumental)".to_string(),
        }
    }
}

/// Lead/backing split produced by the refinement pass.
#[derive(Debug, Default, PartialEq)]
pub struct RefinedVocals {
    pub lead: Option<PathBuf>,
    pub backing: Option<PathBuf>,
}

/// Assign refinement outputs by exact suffix of the file stem.
pub fn classify_refinement(outputs: &[PathBuf], roles: &RefinementRoles) -> RefinedVocals {
    let mut refined = RefinedVocals::default();

    for output in outputs {
        let Some(stem) = output.file_stem().map(|s| s.to_string_lossy()) else {
            continue;
        };
        if stem.ends_with(&roles.lead_suffix) && refined.lead.is_none() {
            refined.lead = Some(output.clone());
        } else if stem.ends_with(&roles.backing_suffix) && refined.backing.is_none() {
            refined.backing = Some(output.clone());
        } else {
            log::debug!("Refinement output has no role: {}", output.display());
        }
    }

    refined
}
