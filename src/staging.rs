//! Image extraction and renaming
//!
//! Walks the ordered markup documents, collects every embedded image and copies
//! it into a staging directory under a synthetic name that encodes its place in
//! the final archive. Staging happens in two passes: the first one classifies
//! references into [StageSlot]s, the second one assigns names once the number
//! of pages, and therefore the width of the numeric prefix, is known.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::{
    error::ConvertError,
    types::{StageSlot, StagedImage},
    utils::{XmlElement, XmlReader, has_extension, percent_decoded, resolve_relative_link},
};

/// Image formats that can be staged
pub const RASTER_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

const COVER_MARKER: &str = "cover";
const TRAILER_MARKER: &str = "createby";

/// An image reference that was classified but not yet copied
#[derive(Debug)]
struct PlannedImage {
    slot: StageSlot,
    reference: String,
    source: PathBuf,
}

/// Assigns slots to references in encounter order
#[derive(Debug, Default)]
struct SlotPlanner {
    planned: Vec<PlannedImage>,
    seen: HashSet<String>,
    has_cover: bool,
    body_pages: usize,
    trailer_pages: usize,
}

impl SlotPlanner {
    /// Classifies one reference
    ///
    /// The first cover-tagged reference takes the cover slot. Later, different
    /// cover-tagged references are kept as body pages so that exactly one
    /// cover exists and no image is lost.
    fn plan(&mut self, reference: &str, source: PathBuf) {
        if !self.seen.insert(reference.to_string()) {
            debug!("Image already staged: {}", reference);
            return;
        }

        let lowered = reference.to_lowercase();
        let slot = if lowered.contains(COVER_MARKER) && !self.has_cover {
            self.has_cover = true;
            StageSlot::Cover
        } else if lowered.contains(TRAILER_MARKER) {
            self.trailer_pages += 1;
            StageSlot::Trailer(self.trailer_pages)
        } else {
            if lowered.contains(COVER_MARKER) {
                warn!("Second cover image staged as a regular page: {}", reference);
            }
            self.body_pages += 1;
            StageSlot::Body(self.body_pages)
        };

        self.planned.push(PlannedImage {
            slot,
            reference: reference.to_string(),
            source,
        });
    }

    fn is_seen(&self, reference: &str) -> bool {
        self.seen.contains(reference)
    }
}

/// Collects the image references of a markup document in document order
///
/// Both HTML `<img src>` and SVG `<image href>` / `<image xlink:href>`
/// elements are recognised.
fn image_references(document: &XmlElement) -> Vec<String> {
    document
        .descendants()
        .filter_map(|element| match element.name.as_str() {
            "img" => element.get_attr("src"),
            "image" => element.get_attr("href").or_else(|| element.get_attr("xlink:href")),
            _ => None,
        })
        .map(str::trim)
        .filter(|reference| !reference.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether a reference points outside the publication
fn is_external(reference: &str) -> bool {
    reference.starts_with("data:") || reference.contains("://")
}

/// Resolves an image reference to a file inside the extraction root
///
/// The reference is tried as written and then percent-decoded, each time
/// relative to the markup document's directory first and the extraction root
/// second.
///
/// ## Return
/// The path of the image relative to `root`, or `None` if no candidate exists.
fn resolve_image(root: &Path, document_dir: &Path, reference: &str) -> Option<PathBuf> {
    let decoded = percent_decoded(reference);
    let spellings = std::iter::once(reference).chain(decoded.as_deref());

    for spelling in spellings {
        for base in [document_dir, Path::new("")] {
            if let Some(candidate) = resolve_relative_link(base, spelling) {
                if root.join(&candidate).is_file() {
                    return Some(candidate);
                }
            }
        }
    }

    None
}

/// Extracts and renames the images of the ordered page list
///
/// ## Parameters
/// - `root`: The directory the EPUB was extracted into
/// - `pages`: The markup documents in reading order, relative to `root`
/// - `staging_dir`: The directory the renamed copies are written into; it is
///   created if necessary
///
/// ## Return
/// - `Ok(Vec<StagedImage>)`: The staged images in slot order
/// - `Err(ConvertError::NoImages)`: Not a single image could be staged
/// - `Err(ConvertError)`: The staging directory could not be created
pub fn stage_images(
    root: &Path,
    pages: &[PathBuf],
    staging_dir: &Path,
) -> Result<Vec<StagedImage>, ConvertError> {
    fs::create_dir_all(staging_dir)?;

    let mut planner = SlotPlanner::default();
    for page in pages {
        plan_document(root, page, &mut planner);
    }

    let width = StageSlot::prefix_width(planner.body_pages, planner.trailer_pages);
    let mut staged = Vec::with_capacity(planner.planned.len());

    for image in planner.planned {
        let extension = image
            .source
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let stem = image.slot.file_stem(planner.body_pages, width);
        let file_name = format!("{}.{}", stem, extension);
        let target = staging_dir.join(&file_name);

        if let Err(err) = fs::copy(root.join(&image.source), &target) {
            warn!("Failed to copy image {}: {}", image.source.display(), err);
            continue;
        }

        debug!("Staged {} as {}", image.reference, file_name);
        staged.push(StagedImage {
            slot: image.slot,
            reference: image.reference,
            source: image.source,
            file_name,
            path: target,
        });
    }

    if staged.is_empty() {
        return Err(ConvertError::NoImages);
    }

    info!("Staged {} images from {} documents", staged.len(), pages.len());
    Ok(staged)
}

/// Plans the images of a single markup document
///
/// Unreadable or malformed documents, unresolvable references and non-raster
/// images are logged and skipped.
fn plan_document(root: &Path, page: &Path, planner: &mut SlotPlanner) {
    let data = match fs::read(root.join(page)) {
        Ok(data) => data,
        Err(err) => {
            warn!("Failed to read {}: {}", page.display(), err);
            return;
        }
    };

    let document = match XmlReader::parse_bytes(&data) {
        Ok(document) => document,
        Err(err) => {
            warn!("Failed to parse {}: {}", page.display(), err);
            return;
        }
    };

    let document_dir = page.parent().unwrap_or(Path::new(""));
    for reference in image_references(&document) {
        if planner.is_seen(&reference) {
            continue;
        }

        if is_external(&reference) {
            debug!("Skipping external image reference in {}", page.display());
            continue;
        }

        let Some(source) = resolve_image(root, document_dir, &reference) else {
            warn!("Image not found: {} (referenced by {})", reference, page.display());
            continue;
        };

        if !has_extension(&source, &RASTER_EXTENSIONS) {
            warn!("Skipping unsupported image format: {}", source.display());
            continue;
        }

        planner.plan(&reference, source);
    }
}
