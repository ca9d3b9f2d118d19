/// Pitch-class names, index 0 = C.
pub const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Triad quality of a chord template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Major,
    Minor,
}

impl Quality {
    /// Semitone offsets of the triad relative to its root.
    fn intervals(self) -> [usize; 3] {
        match self {
            Self::Major => [0, 4, 7],
            Self::Minor => [0, 3, 7],
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::Major => "",
            Self::Minor => "m",
        }
    }
}

/// One unit-norm triad template.
#[derive(Debug, Clone)]
pub struct ChordTemplate {
    pub label: String,
    pub root: usize,
    pub quality: Quality,
    pub vector: [f64; 12],
}

/// Build the 24 major/minor triad templates.
///
/// Order is root-ascending with major before minor (C, Cm, C#, C#m, ...).
/// The recognizer relies on this order to break similarity ties.
pub fn build_templates() -> Vec<ChordTemplate> {
    let mut templates = Vec::with_capacity(24);

    for root in 0..12 {
        for quality in [Quality::Major, Quality::Minor] {
            let mut vector = [0.0_f64; 12];
            for interval in quality.intervals() {
                vector[(root + interval) % 12] = 1.0;
            }
            let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
            for v in &mut vector {
                *v /= norm;
            }

            templates.push(ChordTemplate {
                label: format!("{}{}", PITCH_CLASSES[root], quality.suffix()),
                root,
                quality,
                vector,
            });
        }
    }

    templates
}
