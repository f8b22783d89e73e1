//! Error Type Definition Module
//!
//! This module defines the error types that may be encountered while converting
//! an EPUB publication into a CBZ archive. All errors are uniformly wrapped in the
//! `ConvertError` enumeration for convenient error handling by the caller.
//!
//! Only a few of these errors end a conversion. Parse-level errors (malformed
//! XML, undecodable text) are produced by the lenient readers and are logged by
//! their callers, who then fall back or skip the offending document.

use std::path::PathBuf;

use thiserror::Error;

/// Types of errors that can occur during conversion
#[derive(Debug, Error)]
pub enum ConvertError {
    /// ZIP archive related errors
    ///
    /// Errors occur when reading or writing the ZIP structure of an archive
    /// after it was successfully opened.
    #[error("Archive error: {source}")]
    ArchiveError { source: zip::result::ZipError },

    /// Data Decoding Error - Null data
    ///
    /// This error occurs when trying to decode or parse an empty stream.
    #[error("Decode error: The data is empty.")]
    EmptyDataError,

    /// The external conversion engine finished with a non-zero exit code
    #[error("Conversion engine failed with exit code {code}.")]
    EngineFailed { code: i32 },

    /// The external conversion engine could not be started
    #[error("Conversion engine \"{program}\" could not be started: {source}")]
    EngineUnavailable {
        program: String,
        source: std::io::Error,
    },

    /// The working directory configured for the engine does not exist
    #[error("Conversion engine working directory not found: {}", path.display())]
    EngineDirectoryMissing { path: PathBuf },

    /// The input file does not exist
    #[error("Input file not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    /// The input file is not an `.epub` file
    #[error("Invalid input file format: {}", path.display())]
    InvalidExtension { path: PathBuf },

    /// The input file could not be opened as a ZIP archive
    #[error("Invalid EPUB file \"{}\": {source}", path.display())]
    InvalidInput {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    /// The engine reported success but its output is not a usable comic archive
    #[error("Invalid output archive \"{}\": {reason}", path.display())]
    InvalidOutput { path: PathBuf, reason: String },

    #[error("IO error: {source}")]
    IOError { source: std::io::Error },

    /// XML document ended before all of its elements were closed
    #[error("Malformed XML: The document ended inside the \"{tag}\" element.")]
    MalformedXml { tag: String },

    /// No image could be staged from the publication
    #[error("No images were successfully extracted from the EPUB file.")]
    NoImages,

    /// The output directory could not be created or is not writable
    #[error("Cannot use output directory \"{}\": {reason}", path.display())]
    OutputDirectory { path: PathBuf, reason: String },

    /// The engine reported success but did not produce the output file
    #[error("CBZ file was not created: {}", path.display())]
    OutputMissing { path: PathBuf },

    /// The engine search path could not be assembled
    #[error("Search path error: {source}")]
    SearchPathError { source: std::env::JoinPathsError },

    /// UTF-8 decoding error
    ///
    /// This error occurs when attempting to decode byte data into a UTF-8 string
    /// but the data is not formatted correctly.
    #[error("Decode error: {source}")]
    Utf8DecodeError { source: std::string::FromUtf8Error },

    /// UTF-16 decoding error
    ///
    /// This error occurs when attempting to decode byte data into a UTF-16 string
    /// but the data is not formatted correctly.
    #[error("Decode error: {source}")]
    Utf16DecodeError { source: std::string::FromUtf16Error },

    /// QuickXml error
    ///
    /// This error occurs when parsing XML data using the QuickXml library.
    #[error("QuickXml error: {source}")]
    QuickXmlError { source: quick_xml::Error },
}

impl From<zip::result::ZipError> for ConvertError {
    fn from(value: zip::result::ZipError) -> Self {
        ConvertError::ArchiveError { source: value }
    }
}

impl From<quick_xml::Error> for ConvertError {
    fn from(value: quick_xml::Error) -> Self {
        ConvertError::QuickXmlError { source: value }
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(value: std::io::Error) -> Self {
        ConvertError::IOError { source: value }
    }
}

impl From<std::string::FromUtf8Error> for ConvertError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        ConvertError::Utf8DecodeError { source: value }
    }
}

impl From<std::string::FromUtf16Error> for ConvertError {
    fn from(value: std::string::FromUtf16Error) -> Self {
        ConvertError::Utf16DecodeError { source: value }
    }
}

impl From<std::env::JoinPathsError> for ConvertError {
    fn from(value: std::env::JoinPathsError) -> Self {
        ConvertError::SearchPathError { source: value }
    }
}

#[cfg(test)]
impl PartialEq for ConvertError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::EngineFailed { code: l_code }, Self::EngineFailed { code: r_code }) => {
                l_code == r_code
            }
            (
                Self::EngineDirectoryMissing { path: l_path },
                Self::EngineDirectoryMissing { path: r_path },
            ) => l_path == r_path,
            (Self::InputNotFound { path: l_path }, Self::InputNotFound { path: r_path }) => {
                l_path == r_path
            }
            (Self::InvalidExtension { path: l_path }, Self::InvalidExtension { path: r_path }) => {
                l_path == r_path
            }
            (Self::MalformedXml { tag: l_tag }, Self::MalformedXml { tag: r_tag }) => {
                l_tag == r_tag
            }
            (Self::OutputMissing { path: l_path }, Self::OutputMissing { path: r_path }) => {
                l_path == r_path
            }
            (
                Self::Utf8DecodeError { source: l_source },
                Self::Utf8DecodeError { source: r_source },
            ) => l_source == r_source,

            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}
