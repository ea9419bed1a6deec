//! Typed identify request and its validation.
//!
//! Requests arrive from untrusted transports. Empty and whitespace-only
//! values count as absent, values are trimmed, and a request carrying
//! neither attribute is rejected before any store access.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Upper bound for an attribute value (the longest valid email address).
pub const MAX_ATTRIBUTE_LEN: usize = 320;

/// Wire shape accepted by deserialization before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIdentifyRequest {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
}

/// A validated identify observation: at least one attribute is present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawIdentifyRequest")]
pub struct IdentifyRequest {
    email: Option<String>,
    phone_number: Option<String>,
}

fn normalize(field: &'static str, value: Option<String>) -> Result<Option<String>, ValidationError> {
    let Some(value) = value else { return Ok(None) };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_ATTRIBUTE_LEN {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length: MAX_ATTRIBUTE_LEN,
        });
    }
    if trimmed.len() == value.len() {
        Ok(Some(value))
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

impl IdentifyRequest {
    /// Validates and normalizes an observation.
    ///
    /// # Errors
    /// - `MissingContactAttribute` if neither value is present after trimming
    /// - `FieldTooLong` if a value exceeds [`MAX_ATTRIBUTE_LEN`]
    ///
    /// # Examples
    ///
    /// ```
    /// use contactlink::IdentifyRequest;
    ///
    /// let req = IdentifyRequest::new(Some(" a@x.com ".to_string()), Some(String::new())).unwrap();
    /// assert_eq!(req.email(), Some("a@x.com"));
    /// assert_eq!(req.phone_number(), None);
    ///
    /// assert!(IdentifyRequest::new(None, Some("  ".to_string())).is_err());
    /// ```
    pub fn new(
        email: Option<String>,
        phone_number: Option<String>,
    ) -> Result<Self, ValidationError> {
        let email = normalize("email", email)?;
        let phone_number = normalize("phoneNumber", phone_number)?;
        if email.is_none() && phone_number.is_none() {
            return Err(ValidationError::MissingContactAttribute);
        }
        Ok(Self {
            email,
            phone_number,
        })
    }

    /// Shorthand for an email-only observation.
    pub fn email_only(email: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(Some(email.into()), None)
    }

    /// Shorthand for a phone-only observation.
    pub fn phone_only(phone_number: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(None, Some(phone_number.into()))
    }

    /// Shorthand for an observation carrying both attributes.
    pub fn pair(
        email: impl Into<String>,
        phone_number: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::new(Some(email.into()), Some(phone_number.into()))
    }

    /// The observed email.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// The observed phone number.
    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    /// Splits the request into owned values for a new contact row.
    #[must_use]
    pub fn to_values(&self) -> (Option<String>, Option<String>) {
        (self.email.clone(), self.phone_number.clone())
    }
}

impl TryFrom<RawIdentifyRequest> for IdentifyRequest {
    type Error = ValidationError;

    fn try_from(raw: RawIdentifyRequest) -> Result<Self, Self::Error> {
        Self::new(raw.email, raw.phone_number)
    }
}
