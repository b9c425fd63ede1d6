//! Translatable collaborator defects.
//!
//! Resource routers sit on top of a data layer whose failures fall into a
//! few well-known shapes (a malformed identifier, a unique-key collision, a
//! failed document validation, a bad or expired credential). Routers report
//! them as [`DefectKind`] values; in production the error classifier turns
//! them into operational client errors through [`DefectTranslations`].

use crate::error::AppError;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of defects the classifier can translate.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefectKind {
    /// An identifier could not be cast to the store's id type.
    #[error("Cast failed for value \"{value}\" at path \"{path}\"")]
    MalformedId {
        /// Field that held the identifier.
        path: String,
        /// The offending value.
        value: String,
    },
    /// A unique index rejected a write.
    #[error("E11000 duplicate key error: {field} = \"{value}\"")]
    DuplicateKey {
        /// Field covered by the unique index.
        field: String,
        /// The duplicated value.
        value: String,
    },
    /// Document validation failed.
    #[error("Validation failed: {}", .errors.join(", "))]
    ValidationFailed {
        /// One message per failing field.
        errors: Vec<String>,
    },
    /// A bearer credential had a bad signature or shape.
    #[error("invalid signature")]
    InvalidCredential,
    /// A bearer credential was valid but expired.
    #[error("credential expired")]
    ExpiredCredential,
}

impl DefectKind {
    /// Short snake_case name, used as a metrics label.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MalformedId { .. } => "malformed_id",
            Self::DuplicateKey { .. } => "duplicate_key",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::InvalidCredential => "invalid_credential",
            Self::ExpiredCredential => "expired_credential",
        }
    }
}

/// Status and message template for one defect kind.
///
/// Templates may reference `{path}`, `{value}`, `{field}` and `{errors}`;
/// placeholders the defect does not carry are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslationRule {
    /// HTTP status of the translated error (must be 4xx).
    pub status: u16,
    /// Message template.
    pub message: String,
}

impl TranslationRule {
    /// Creates a rule.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// A translation rule whose status is not a client error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("translation rule '{rule}' has status {status}, expected 400-499")]
pub struct InvalidTranslation {
    /// Name of the rule.
    pub rule: &'static str,
    /// The configured status.
    pub status: u16,
}

/// Translation table applied by the error classifier in production.
///
/// # Example
///
/// ```
/// use trailhead_core::{AppError, DefectKind, DefectTranslations};
///
/// let table = DefectTranslations::default();
/// let err = AppError::defect(DefectKind::MalformedId {
///     path: "_id".into(),
///     value: "abc".into(),
/// });
/// let translated = table.translate(&err).unwrap();
/// assert_eq!(translated.message(), "Invalid _id: abc.");
/// assert!(translated.is_operational());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefectTranslations {
    /// Separator used to join validation messages into `{errors}`.
    pub errors_separator: String,
    /// Rule for [`DefectKind::MalformedId`].
    pub malformed_id: TranslationRule,
    /// Rule for [`DefectKind::DuplicateKey`].
    pub duplicate_key: TranslationRule,
    /// Rule for [`DefectKind::ValidationFailed`].
    pub validation_failed: TranslationRule,
    /// Rule for [`DefectKind::InvalidCredential`].
    pub invalid_credential: TranslationRule,
    /// Rule for [`DefectKind::ExpiredCredential`].
    pub expired_credential: TranslationRule,
}

impl Default for DefectTranslations {
    fn default() -> Self {
        Self {
            errors_separator: ". ".to_string(),
            malformed_id: TranslationRule::new(400, "Invalid {path}: {value}."),
            duplicate_key: TranslationRule::new(
                400,
                "Duplicate field value: {value}. Please use another value!",
            ),
            validation_failed: TranslationRule::new(400, "Invalid input data. {errors}"),
            invalid_credential: TranslationRule::new(401, "Invalid token. Please log in again!"),
            expired_credential: TranslationRule::new(
                401,
                "Your token has expired! Please log in again.",
            ),
        }
    }
}

/// Fills `{name}` placeholders in one pass over `template`.
///
/// Substituted values are never scanned again, and unknown placeholders are
/// kept verbatim.
fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let replaced = tail.find('}').and_then(|close| {
            let name = &tail[1..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });
        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

impl DefectTranslations {
    /// Returns the rule that applies to `kind`.
    pub const fn rule_for(&self, kind: &DefectKind) -> &TranslationRule {
        match kind {
            DefectKind::MalformedId { .. } => &self.malformed_id,
            DefectKind::DuplicateKey { .. } => &self.duplicate_key,
            DefectKind::ValidationFailed { .. } => &self.validation_failed,
            DefectKind::InvalidCredential => &self.invalid_credential,
            DefectKind::ExpiredCredential => &self.expired_credential,
        }
    }

    /// Renders the client message for `kind`.
    pub fn render(&self, kind: &DefectKind) -> String {
        let template = &self.rule_for(kind).message;
        match kind {
            DefectKind::MalformedId { path, value } => {
                substitute(template, &[("path", path.as_str()), ("value", value.as_str())])
            }
            DefectKind::DuplicateKey { field, value } => {
                substitute(template, &[("field", field.as_str()), ("value", value.as_str())])
            }
            DefectKind::ValidationFailed { errors } => {
                let joined = errors.join(&self.errors_separator);
                substitute(template, &[("errors", joined.as_str())])
            }
            DefectKind::InvalidCredential | DefectKind::ExpiredCredential => template.clone(),
        }
    }

    /// Translates a defect-carrying error into an operational one.
    ///
    /// Returns `None` when `error` is already operational or carries no
    /// [`DefectKind`].
    pub fn translate(&self, error: &AppError) -> Option<AppError> {
        if error.is_operational() {
            return None;
        }
        let kind = error.defect_kind()?;
        let status = StatusCode::from_u16(self.rule_for(kind).status)
            .unwrap_or(StatusCode::BAD_REQUEST);
        Some(AppError::translated(
            self.render(kind),
            status,
            kind.clone(),
            error.origin(),
        ))
    }

    /// Checks that every rule maps to a client-error status.
    pub fn check(&self) -> Result<(), InvalidTranslation> {
        let rules = [
            ("malformed_id", &self.malformed_id),
            ("duplicate_key", &self.duplicate_key),
            ("validation_failed", &self.validation_failed),
            ("invalid_credential", &self.invalid_credential),
            ("expired_credential", &self.expired_credential),
        ];
        for (rule, translation) in rules {
            if !(400..500).contains(&translation.status) {
                return Err(InvalidTranslation {
                    rule,
                    status: translation.status,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorStatus;

    fn translate(kind: DefectKind) -> AppError {
        DefectTranslations::default()
            .translate(&AppError::defect(kind))
            .expect("defect should translate")
    }

    #[test]
    fn test_malformed_id_translation() {
        let err = translate(DefectKind::MalformedId {
            path: "_id".into(),
            value: "wwwww".into(),
        });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "Invalid _id: wwwww.");
        assert_eq!(err.status(), ErrorStatus::Fail);
    }

    #[test]
    fn test_duplicate_key_translation() {
        let err = translate(DefectKind::DuplicateKey {
            field: "name".into(),
            value: "The Forest Hiker".into(),
        });
        assert_eq!(
            err.message(),
            "Duplicate field value: The Forest Hiker. Please use another value!"
        );
    }

    #[test]
    fn test_validation_errors_are_joined() {
        let err = translate(DefectKind::ValidationFailed {
            errors: vec![
                "A tour must have a name".into(),
                "Difficulty is either: easy, medium, difficult".into(),
            ],
        });
        assert_eq!(
            err.message(),
            "Invalid input data. A tour must have a name. Difficulty is either: easy, medium, difficult"
        );
    }

    #[test]
    fn test_placeholders_inside_values_are_not_expanded() {
        let err = translate(DefectKind::MalformedId {
            path: "{value}".into(),
            value: "abc".into(),
        });
        assert_eq!(err.message(), "Invalid {value}: abc.");

        let err = translate(DefectKind::DuplicateKey {
            field: "name".into(),
            value: "{field}".into(),
        });
        assert_eq!(
            err.message(),
            "Duplicate field value: {field}. Please use another value!"
        );
    }

    #[test]
    fn test_substitute_keeps_unknown_and_unclosed_braces() {
        assert_eq!(substitute("{a} {b} {", &[("a", "1")]), "1 {b} {");
        assert_eq!(substitute("no placeholders", &[("a", "1")]), "no placeholders");
    }

    #[test]
    fn test_credential_translations_are_401() {
        let invalid = translate(DefectKind::InvalidCredential);
        assert_eq!(invalid.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.message(), "Invalid token. Please log in again!");

        let expired = translate(DefectKind::ExpiredCredential);
        assert_eq!(expired.message(), "Your token has expired! Please log in again.");
    }

    #[test]
    fn test_translation_keeps_origin() {
        let defect = AppError::defect(DefectKind::InvalidCredential);
        let translated = DefectTranslations::default().translate(&defect).unwrap();
        assert_eq!(translated.origin(), defect.origin());
        assert!(translated.is_operational());
    }

    #[test]
    fn test_operational_and_plain_errors_are_not_translated() {
        let table = DefectTranslations::default();
        assert!(table.translate(&AppError::not_found("x")).is_none());
        assert!(table.translate(&AppError::internal("x")).is_none());
    }

    #[test]
    fn test_custom_rule_from_json() {
        let table: DefectTranslations = serde_json::from_value(serde_json::json!({
            "duplicate_key": {"status": 409, "message": "{field} already taken"}
        }))
        .unwrap();
        let err = table
            .translate(&AppError::defect(DefectKind::DuplicateKey {
                field: "email".into(),
                value: "a@b.c".into(),
            }))
            .unwrap();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.message(), "email already taken");
        assert_eq!(table.malformed_id, DefectTranslations::default().malformed_id);
    }

    #[test]
    fn test_check_rejects_non_client_status() {
        let mut table = DefectTranslations::default();
        assert!(table.check().is_ok());
        table.expired_credential.status = 500;
        let err = table.check().unwrap_err();
        assert_eq!(err.rule, "expired_credential");
    }

    #[test]
    fn test_defect_kind_serializes_with_tag() {
        let json = serde_json::to_value(DefectKind::MalformedId {
            path: "_id".into(),
            value: "1".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "malformed_id");
        assert_eq!(DefectKind::ExpiredCredential.name(), "expired_credential");
    }
}
