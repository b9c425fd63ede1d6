//! # Trailhead Core
//!
//! Foundational types shared by every Trailhead crate:
//!
//! - [`AppError`] - The structured error every failing stage or router produces
//! - [`DefectKind`] - Closed set of collaborator defects the classifier can translate
//! - [`DefectTranslations`] - Configurable status/message rules for those defects
//! - [`DeploymentMode`] - Development vs production error rendering
//! - [`RequestId`] - UUID v7 request identifier used for log correlation

#![doc(html_root_url = "https://docs.rs/trailhead-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod defect;
mod error;
mod id;
mod mode;

pub use defect::{DefectKind, DefectTranslations, InvalidTranslation, TranslationRule};
pub use error::{AppError, AppResult, ErrorBody, ErrorDetail, ErrorStatus, GENERIC_MESSAGE};
pub use id::RequestId;
pub use mode::{DeploymentMode, ParseModeError};
