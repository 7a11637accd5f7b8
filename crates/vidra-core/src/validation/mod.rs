//! Validation modules

pub mod upload;

pub use upload::{
    parse_tags, validate_file_descriptor, validate_target_metadata, MAX_TAGS, MAX_TAG_LENGTH,
};
