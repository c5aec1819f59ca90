//! Batch request types

use std::collections::BTreeSet;

use crate::models::wave::SurveyWave;

/// A set of codebooks to download for one wave
///
/// The codebook names carry no ordering significance; they are kept in a
/// sorted set so iteration is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodebookRequest {
    pub wave: SurveyWave,
    pub codebooks: BTreeSet<String>,
}

impl CodebookRequest {
    pub fn new<I, S>(wave: SurveyWave, codebooks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            wave,
            codebooks: codebooks.into_iter().map(Into::into).collect(),
        }
    }

    /// Request codebook stems, suffixed with the wave letter
    pub fn from_stems<I, S>(wave: SurveyWave, stems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(wave, stems.into_iter().map(|s| wave.codebook_name(s.as_ref())))
    }

    /// Number of requested codebooks
    #[must_use]
    pub fn len(&self) -> usize {
        self.codebooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codebooks.is_empty()
    }

    /// `(wave, codebook)` keys of this request
    pub fn keys(&self) -> impl Iterator<Item = TableKey> + '_ {
        self.codebooks
            .iter()
            .map(|name| TableKey::codebook(self.wave, name.clone()))
    }
}

/// Identity of one cacheable table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableKey {
    Codebook { wave: SurveyWave, name: String },
    Mortality { wave: SurveyWave },
}

impl TableKey {
    pub fn codebook(wave: SurveyWave, name: impl Into<String>) -> Self {
        Self::Codebook {
            wave,
            name: name.into(),
        }
    }

    #[must_use]
    pub const fn mortality(wave: SurveyWave) -> Self {
        Self::Mortality { wave }
    }

    #[must_use]
    pub const fn wave(&self) -> SurveyWave {
        match self {
            Self::Codebook { wave, .. } | Self::Mortality { wave } => *wave,
        }
    }

    /// File stem of the cache snapshot
    #[must_use]
    pub fn stem(&self) -> &str {
        match self {
            Self::Codebook { name, .. } => name,
            Self::Mortality { .. } => "mortality",
        }
    }
}

impl std::fmt::Display for TableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.wave(), self.stem())
    }
}
