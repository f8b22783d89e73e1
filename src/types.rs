use std::path::PathBuf;

use crate::utils::has_extension;

/// Represents a resource item declared in the package manifest
///
/// Only the parts of a manifest item that matter for establishing the reading
/// order are kept: the identifier referenced by the spine, the location of the
/// resource and its declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    /// The unique identifier of the item inside the manifest
    pub id: String,

    /// The path of the resource, relative to the extraction root
    ///
    /// The `href` of the item is resolved against the directory of the package
    /// document and normalized, so it can be joined directly onto the root.
    pub path: PathBuf,

    /// The declared media type of the resource, if any
    pub mime: Option<String>,
}

impl ManifestItem {
    /// Whether the item is a markup (content) document
    ///
    /// An item is markup when its path carries an `.html` or `.xhtml` extension,
    /// or when its declared media type is an HTML flavour.
    pub fn is_markup(&self) -> bool {
        let by_extension = has_extension(&self.path, &["html", "xhtml"]);

        let by_mime = self
            .mime
            .as_deref()
            .is_some_and(|mime| mime == "application/xhtml+xml" || mime == "text/html");

        by_extension || by_mime
    }
}

/// Represents an item in the spine, the declared reading order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    /// The id of the manifest item this entry points to
    pub idref: String,
}

/// The ordering class of a staged image
///
/// The derived ordering is the page order of the final archive: the cover
/// first, then body pages by ascending index, then the "created-by" trailer
/// pages by ascending index. Indexes are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageSlot {
    Cover,
    Body(usize),
    Trailer(usize),
}

impl StageSlot {
    /// Returns the file stem used for this slot
    ///
    /// Every stem starts with a numeric prefix zero-padded to `width`, so the
    /// lexicographic order of the file names equals the order of the slots.
    /// Trailer pages are numbered after the last of the `body_pages` body pages.
    ///
    /// ## Parameters
    /// - `body_pages`: The number of body pages in the staged set
    /// - `width`: The width of the numeric prefix, see [StageSlot::prefix_width]
    pub fn file_stem(&self, body_pages: usize, width: usize) -> String {
        match self {
            StageSlot::Cover => format!("{:0width$}_cover", 0),
            StageSlot::Body(index) => format!("{index:0width$}"),
            StageSlot::Trailer(index) => format!("{:0width$}_createby", body_pages + index),
        }
    }

    /// Returns the prefix width needed to number every page of a staged set
    ///
    /// The width is never narrower than four digits.
    pub fn prefix_width(body_pages: usize, trailer_pages: usize) -> usize {
        let largest = body_pages + trailer_pages;
        largest.to_string().len().max(4)
    }
}

/// An image copied into the staging directory under its synthetic name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedImage {
    /// The ordering class of the image
    pub slot: StageSlot,

    /// The reference exactly as written in the markup document
    pub reference: String,

    /// The resolved location of the original image
    pub source: PathBuf,

    /// The synthetic file name, e.g. `0000_cover.jpg` or `0012.png`
    pub file_name: String,

    /// The location of the staged copy
    pub path: PathBuf,
}

/// What the external conversion engine reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    /// Process-style exit code, zero means success
    pub exit_code: i32,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,
}

impl EngineOutput {
    /// Creates an output with the given exit code and no captured text
    pub fn with_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }
}

/// The outcome of converting one input file
///
/// Failures are contained in the report; they never abort a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    /// The EPUB file that was converted
    pub input: PathBuf,

    /// The CBZ file that was written, present only on success
    pub output: Option<PathBuf>,

    pub success: bool,

    /// A human-readable summary of the outcome
    pub message: String,
}

impl ConversionReport {
    pub fn succeeded(input: PathBuf, output: PathBuf) -> Self {
        let message = format!("Converted to {}", output.display());
        Self {
            input,
            output: Some(output),
            success: true,
            message,
        }
    }

    pub fn failed(input: PathBuf, message: impl Into<String>) -> Self {
        Self {
            input,
            output: None,
            success: false,
            message: message.into(),
        }
    }
}
