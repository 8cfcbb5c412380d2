mod service;

pub use self::service::{ServiceExt, int_or_string_text, int_or_string_value};
