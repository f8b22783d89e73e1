//! Heuristic page discovery
//!
//! Used when the publication does not declare a usable reading order. Many
//! image-only EPUBs produced by comic shops keep one markup document per page in
//! an `html` folder named `page-<n>.html`, which is what this scan relies on.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use log::{debug, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::utils::has_extension;

/// The conventional content folder, directly under the extraction root
pub const CONTENT_DIR: &str = "html";

/// Prefix of template documents that never carry pages
const TEMPLATE_PREFIX: &str = "tpl_";

/// The fixed name of the trailer document
const TRAILER_FILE: &str = "createby.html";

static PAGE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"page-(\d+)").expect("page number pattern is valid"));

/// Extracts the page number embedded in a file name
///
/// Names without a `page-<digits>` marker, or whose number does not fit in a
/// `u64`, yield `None`.
fn page_number(file_name: &str) -> Option<u64> {
    PAGE_NUMBER_RE
        .captures(file_name)
        .and_then(|captures| captures.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

/// Scans the conventional content folder for page documents
///
/// Markup files in `<root>/html` are kept, except templates (`tpl_` prefix)
/// and the trailer document (`createby.html`). The result is sorted by the
/// page number embedded in each name; documents without a number come last,
/// ordered by name among themselves.
///
/// ## Parameters
/// - `root`: The directory the EPUB was extracted into
///
/// ## Return
/// The page documents, relative to `root`. The list is empty when the folder
/// does not exist.
pub fn discover_pages(root: &Path) -> Vec<PathBuf> {
    let content_dir = root.join(CONTENT_DIR);
    if !content_dir.is_dir() {
        debug!("No {}/ folder to scan for pages", CONTENT_DIR);
        return Vec::new();
    }

    let mut names = WalkDir::new(&content_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Failed to scan {}: {}", content_dir.display(), err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| has_extension(name, &["html", "xhtml"]))
        .filter(|name| !name.starts_with(TEMPLATE_PREFIX))
        .filter(|name| !name.eq_ignore_ascii_case(TRAILER_FILE))
        .collect::<Vec<String>>();

    // directory order is platform dependent, the name sort makes ties stable
    names.sort();
    names.sort_by_key(|name| page_number(name).unwrap_or(u64::MAX));

    debug!("Discovered {} page documents in {}/", names.len(), CONTENT_DIR);

    names
        .into_iter()
        .map(|name| Path::new(CONTENT_DIR).join(name))
        .collect()
}
