//! Continuous NHANES survey waves
//!
//! Each wave covers two calendar years. The start year is an explicit property
//! of every variant and the end year is always derived from it.

use std::fmt;
use std::str::FromStr;

/// One two-year data-collection period of continuous NHANES
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SurveyWave {
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Sixth,
    Seventh,
    Eighth,
    Ninth,
    Tenth,
    Eleventh,
    Twelfth,
}

impl SurveyWave {
    /// All known waves, oldest first
    pub const ALL: [Self; 12] = [
        Self::First,
        Self::Second,
        Self::Third,
        Self::Fourth,
        Self::Fifth,
        Self::Sixth,
        Self::Seventh,
        Self::Eighth,
        Self::Ninth,
        Self::Tenth,
        Self::Eleventh,
        Self::Twelfth,
    ];

    /// Iterate all known waves, oldest first
    pub fn all() -> impl DoubleEndedIterator<Item = Self> + ExactSizeIterator {
        Self::ALL.into_iter()
    }

    /// First calendar year of the wave
    #[must_use]
    pub const fn start_year(self) -> u16 {
        match self {
            Self::First => 1999,
            Self::Second => 2001,
            Self::Third => 2003,
            Self::Fourth => 2005,
            Self::Fifth => 2007,
            Self::Sixth => 2009,
            Self::Seventh => 2011,
            Self::Eighth => 2013,
            Self::Ninth => 2015,
            Self::Tenth => 2017,
            Self::Eleventh => 2019,
            Self::Twelfth => 2021,
        }
    }

    /// Last calendar year of the wave
    #[must_use]
    pub const fn end_year(self) -> u16 {
        self.start_year() + 1
    }

    /// `(start, end)` year pair
    #[must_use]
    pub const fn years(self) -> (u16, u16) {
        (self.start_year(), self.end_year())
    }

    /// Human readable two-year label, also used as the cache directory name
    #[must_use]
    pub fn label(self) -> String {
        format!("{}-{}", self.start_year(), self.end_year())
    }

    /// Letter appended to codebook names of this wave (`DEMO_D` for 2005-2006)
    ///
    /// The first wave has no suffix.
    #[must_use]
    pub const fn codebook_suffix(self) -> Option<char> {
        match self {
            Self::First => None,
            Self::Second => Some('B'),
            Self::Third => Some('C'),
            Self::Fourth => Some('D'),
            Self::Fifth => Some('E'),
            Self::Sixth => Some('F'),
            Self::Seventh => Some('G'),
            Self::Eighth => Some('H'),
            Self::Ninth => Some('I'),
            Self::Tenth => Some('J'),
            Self::Eleventh => Some('K'),
            Self::Twelfth => Some('L'),
        }
    }

    /// Name of a codebook stem within this wave, e.g. `BMX` -> `BMX_E`
    #[must_use]
    pub fn codebook_name(self, stem: &str) -> String {
        match self.codebook_suffix() {
            Some(letter) => format!("{stem}_{letter}"),
            None => stem.to_string(),
        }
    }

    /// Wave starting in the given year
    #[must_use]
    pub fn from_start_year(year: u16) -> Option<Self> {
        Self::all().find(|w| w.start_year() == year)
    }

    /// Location of a codebook payload below `base_url`
    #[must_use]
    pub fn codebook_url(self, base_url: &str, codebook: &str) -> String {
        format!(
            "{}/{}/{codebook}.XPT",
            base_url.trim_end_matches('/'),
            self.label()
        )
    }

    /// Location of the linked mortality file below `base_url`
    #[must_use]
    pub fn mortality_url(self, base_url: &str) -> String {
        let (start, end) = self.years();
        format!(
            "{}/NHANES_{start}_{end}_MORT_2015_PUBLIC.dat",
            base_url.trim_end_matches('/')
        )
    }
}

impl fmt::Display for SurveyWave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_year(), self.end_year())
    }
}

impl FromStr for SurveyWave {
    type Err = String;

    /// Parse a wave from its start year (`2005`) or its label (`2005-2006`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (start, end) = match s.split_once('-') {
            Some((start, end)) => (start, Some(end)),
            None => (s, None),
        };
        let start: u16 = start
            .parse()
            .map_err(|e| format!("Invalid survey wave {s}: {e}"))?;
        let wave =
            Self::from_start_year(start).ok_or_else(|| format!("Unknown survey wave: {s}"))?;

        if let Some(end) = end {
            let end: u16 = end
                .parse()
                .map_err(|e| format!("Invalid survey wave {s}: {e}"))?;
            if end != wave.end_year() {
                return Err(format!("Survey wave {s} does not span two years"));
            }
        }

        Ok(wave)
    }
}
