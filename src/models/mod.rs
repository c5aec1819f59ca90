//! Domain types: survey waves, keyed tables and batch requests

pub mod request;
pub mod table;
pub mod wave;

pub use request::{CodebookRequest, TableKey};
pub use table::{Codebook, KeyConversionError, KeyedTable, Mortality, SUBJECT_KEY};
pub use wave::SurveyWave;
