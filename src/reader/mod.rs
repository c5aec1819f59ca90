//! Decoders for raw survey payloads.
//!
//! Codebooks arrive as SAS transport files and mortality follow-up as
//! fixed-width text. Both decode into Arrow data.

pub mod fixed_width;
pub mod xport;

pub use fixed_width::{
    MORTALITY_COLUMN_SPECS, MORTALITY_COLUMNS, MORTALITY_DROPPED, MortalityRecords,
    read_mortality,
};
pub use xport::{Variable, VariableKind, XportError, ibm_to_f64, read_xport};
