//! Utility functions shared by the fetch and parse layers.
//!
//! - **URL validation**: syntax and scheme checks for feed-add input
//! - **Text cleanup**: control-character stripping for feed-supplied text

mod text;
mod url_validator;

pub use text::{clean_field, strip_control_chars};
pub use url_validator::{validate_url, UrlValidationError};
