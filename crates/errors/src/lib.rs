//! `knxproject_errors` declares the typed failure surface of the resolution
//! engine.
//!
//! The core never returns a partial document: any failure unwinds with one
//! of the five [`Error`] variants, each of which a caller can match on
//! independently of the others. `miette::Diagnostic` is derived alongside
//! `thiserror::Error` so callers that want rich terminal reports can opt in
//! to `miette`'s formatting without the library imposing it.

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

use miette::Diagnostic;
use thiserror::Error;

/// Result alias using [`Error`] as its error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The typed failure surface of the resolution engine (spec §7).
///
/// A failure at any stage releases archive resources and returns one of
/// these variants; no partial output document is ever returned.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// No password was supplied for a protected archive, or the supplied
    /// password failed to decrypt the inner archive.
    #[error("the project is password-protected and the supplied password did not open it")]
    #[diagnostic(help("check the password, or omit it only for unprotected projects"))]
    InvalidPassword,

    /// No `P-XXXX.signature` file was found at the outer archive root.
    #[error("no `P-XXXX.signature` file found at the root of the archive")]
    #[diagnostic(help("the file does not look like a `.knxproj` export"))]
    ProjectNotFound,

    /// The namespace/schema version could not be parsed out of
    /// `knx_master.xml`, or XML in a required position was malformed.
    #[error("unexpected file content: {0}")]
    UnexpectedFileContent(String),

    /// A required cross-reference failed to resolve after parsing,
    /// indicating an internally inconsistent project.
    #[error("unexpected data: {0}")]
    UnexpectedData(String),

    /// An underlying archive or filesystem I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(transparent)]
    Io(#[from] std::io::Error),

    /// An underlying ZIP container error.
    #[error("ZIP archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// An underlying XML parsing error.
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// An underlying XML attribute-parsing error.
    #[error("XML attribute error: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),
}

impl Error {
    /// Build an [`Error::UnexpectedFileContent`] from a formattable message.
    pub fn unexpected_file_content(message: impl Into<String>) -> Self {
        Self::UnexpectedFileContent(message.into())
    }

    /// Build an [`Error::UnexpectedData`] from a formattable message.
    pub fn unexpected_data(message: impl Into<String>) -> Self {
        Self::UnexpectedData(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_are_distinguishable() {
        let password = Error::InvalidPassword;
        let not_found = Error::ProjectNotFound;

        assert!(matches!(password, Error::InvalidPassword));
        assert!(matches!(not_found, Error::ProjectNotFound));
        assert_ne!(password.to_string(), not_found.to_string());
    }

    #[test]
    fn unexpected_data_carries_message() {
        let error = Error::unexpected_data("function `F-1` references missing GA `X`");
        assert!(error.to_string().contains("F-1"));
    }
}
