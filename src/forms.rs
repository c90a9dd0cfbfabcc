//! Form decoding and black-box field validation.
//!
//! Handlers treat validation as a checklist against a parsed [`Form`]: each
//! check records an error message for its field, and the handler re-renders
//! the page when [`Form::valid`] is false. The rules themselves are simple
//! placeholders; the pipeline only cares that invalid submissions never
//! reach the stores.

use std::collections::HashMap;

/// A parsed `application/x-www-form-urlencoded` request body.
#[derive(Debug, Clone, Default)]
pub struct Form {
    values: HashMap<String, String>,
    /// Validation errors keyed by field name.
    pub errors: HashMap<&'static str, String>,
}

impl Form {
    /// Decode a form body. Repeated fields keep their first value.
    pub fn parse(body: &[u8]) -> Self {
        let mut values = HashMap::new();
        for (name, value) in url::form_urlencoded::parse(body) {
            values
                .entry(name.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        Self {
            values,
            errors: HashMap::new(),
        }
    }

    /// The submitted value for a field, or the empty string.
    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or("")
    }

    /// Require the field to be non-blank.
    pub fn required(&mut self, field: &'static str) -> &mut Self {
        if self.get(field).trim().is_empty() {
            self.errors
                .entry(field)
                .or_insert_with(|| "This field cannot be blank".to_string());
        }
        self
    }

    /// Require the field to be at most `max` characters long.
    pub fn max_length(&mut self, field: &'static str, max: usize) -> &mut Self {
        if self.get(field).chars().count() > max {
            self.errors
                .entry(field)
                .or_insert_with(|| format!("This field is too long (maximum is {max} characters)"));
        }
        self
    }

    /// Require the field to be at least `min` characters long.
    /// Blank fields are left to [`Form::required`].
    pub fn min_length(&mut self, field: &'static str, min: usize) -> &mut Self {
        let value = self.get(field);
        if !value.is_empty() && value.chars().count() < min {
            self.errors
                .entry(field)
                .or_insert_with(|| format!("This field is too short (minimum is {min} characters)"));
        }
        self
    }

    /// A minimal shape check for email addresses.
    pub fn looks_like_email(&mut self, field: &'static str) -> &mut Self {
        let value = self.get(field);
        if !value.is_empty() && !(value.contains('@') && value.contains('.')) {
            self.errors
                .entry(field)
                .or_insert_with(|| "This field is invalid".to_string());
        }
        self
    }

    /// True if no check has failed so far.
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }
}
