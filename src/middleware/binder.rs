//! Decodes request bodies into typed inputs and runs their validation rules.
//!
//! JSON bodies go through `serde_json`; URL-encoded bodies and multipart text
//! fields through `serde_urlencoded`. Decode failures and rule violations are
//! reported as different error kinds so clients can tell a malformed body from
//! a bad field value.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use super::validators::ReservedNames;
use crate::config::StorageConfig;
use crate::error::ApiError;

/// An input payload the binder can produce.
pub trait FormInput: DeserializeOwned + Validate {
    /// Owner-name fields (`(field, value)`) that must not be reserved names
    fn owner_names(&self) -> Vec<(&'static str, &str)> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct Binder {
    reserved: Arc<ReservedNames>,
}

impl Binder {
    pub fn new(reserved: ReservedNames) -> Self {
        Self {
            reserved: Arc::new(reserved),
        }
    }

    /// Reserved names come from the configured JSON file, or the built-in list
    pub fn from_config(storage: &StorageConfig) -> anyhow::Result<Self> {
        let reserved = match &storage.owner_blacklist_path {
            Some(path) => ReservedNames::load(path)?,
            None => ReservedNames::builtin(),
        };
        Ok(Self::new(reserved))
    }

    pub fn bind_json<T: FormInput>(&self, body: &[u8]) -> Result<T, ApiError> {
        let value: T = serde_json::from_slice(body).map_err(|e| ApiError::invalid_json(e.to_string()))?;
        self.check(value)
    }

    pub fn bind_urlencoded<T: FormInput>(&self, body: &[u8]) -> Result<T, ApiError> {
        let value: T = serde_urlencoded::from_bytes(body)
            .map_err(|e| ApiError::invalid_form("Unable to decode form", vec![e.to_string()]))?;
        self.check(value)
    }

    /// Bind already-split form fields (multipart text parts)
    pub fn bind_form<T: FormInput>(&self, pairs: &[(String, String)]) -> Result<T, ApiError> {
        let encoded = serde_urlencoded::to_string(pairs)
            .map_err(|e| ApiError::invalid_form("Unable to decode form", vec![e.to_string()]))?;
        self.bind_urlencoded(encoded.as_bytes())
    }

    fn check<T: FormInput>(&self, value: T) -> Result<T, ApiError> {
        if let Err(errors) = value.validate() {
            return Err(validation_failure(&errors));
        }

        let mut reserved = BTreeMap::new();
        for (field, name) in value.owner_names() {
            if self.reserved.contains(name) {
                reserved.insert(field.to_string(), format!("'{}' is a reserved name", name));
            }
        }
        if !reserved.is_empty() {
            return Err(ApiError::validation_error("Invalid field value", Some(reserved)));
        }

        Ok(value)
    }
}

fn validation_failure(errors: &ValidationErrors) -> ApiError {
    let mut fields = BTreeMap::new();
    for (field, errs) in errors.field_errors() {
        let message = errs
            .first()
            .map(|e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string())
            })
            .unwrap_or_else(|| "invalid".to_string());
        fields.insert(field.to_string(), message);
    }
    ApiError::validation_error("Invalid field value", Some(fields))
}
