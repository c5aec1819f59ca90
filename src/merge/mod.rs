//! The merge algebra over keyed survey tables.
//!
//! - codebooks of one wave are joined column-wise ([`join_codebooks`])
//! - waves are appended row-wise ([`append_codebooks`], [`append_mortalities`])
//! - survey data is linked with mortality follow-up ([`link_codebook_with_mortality`])
//!
//! Every operation returns a new table; inputs are never modified.

pub mod append;
pub mod join;

pub use append::{
    append_codebooks, append_mortalities, append_tables, drop_duplicate_columns, unify_types,
};
pub use join::{
    join_codebooks, join_codebooks_with, link_codebook_with_mortality,
    link_codebook_with_mortality_with, outer_join,
};
