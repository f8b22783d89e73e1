//! Container and package document parsing
//!
//! This module establishes the reading order of an extracted EPUB. It follows
//! `META-INF/container.xml` to the package document (OPF), builds the manifest
//! map from item ids to resource paths and walks the spine to produce the
//! ordered list of markup documents.
//!
//! Malformed publications are common, so nothing in here fails: every problem
//! is logged and reported as "no result", leaving the caller free to fall back
//! to heuristic page discovery.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, error, warn};

use crate::{
    types::{ManifestItem, SpineItem},
    utils::{XmlElement, XmlReader, percent_decoded, resolve_relative_link},
};

/// Location of the container document inside every EPUB
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Media type marking a rootfile as the package document
pub const PACKAGE_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// The parts of a package document needed to establish the reading order
#[derive(Debug)]
pub struct PackageDocument {
    /// The path of the package document, relative to the extraction root
    pub package_path: PathBuf,

    /// The namespace declared by the root `package` element, if any
    pub namespace: Option<String>,

    /// Manifest items keyed by their id
    ///
    /// When ids collide, the item declared last wins.
    pub manifest: HashMap<String, ManifestItem>,

    /// Spine entries in document order
    pub spine: Vec<SpineItem>,
}

impl PackageDocument {
    /// Parses a package document found at `package_path` below `root`
    ///
    /// ## Parameters
    /// - `root`: The extraction root
    /// - `package_path`: The path of the package document, relative to `root`
    ///
    /// ## Return
    /// - `Some(PackageDocument)`: The parsed manifest and spine
    /// - `None`: The document could not be read or parsed; the cause is logged
    pub fn open(root: &Path, package_path: &Path) -> Option<Self> {
        let data = match fs::read(root.join(package_path)) {
            Ok(data) => data,
            Err(err) => {
                error!(
                    "Failed to read package document {}: {}",
                    package_path.display(),
                    err
                );
                return None;
            }
        };

        let package = match XmlReader::parse_bytes(&data) {
            Ok(package) => package,
            Err(err) => {
                error!("Invalid XML in package document {}: {}", package_path.display(), err);
                return None;
            }
        };

        debug!(
            "Package document {} uses namespace {:?}",
            package_path.display(),
            package.namespace
        );

        let base_path = package_path.parent().unwrap_or(Path::new("")).to_path_buf();
        let manifest = package
            .find_elements_by_name("manifest")
            .next()
            .map(|element| Self::parse_manifest(element, &base_path))
            .unwrap_or_default();
        let spine = package
            .find_elements_by_name("spine")
            .next()
            .map(Self::parse_spine)
            .unwrap_or_default();

        if manifest.is_empty() {
            warn!("Package document {} declares no manifest items", package_path.display());
        }
        if spine.is_empty() {
            warn!("Package document {} declares an empty spine", package_path.display());
        }

        Some(Self {
            package_path: package_path.to_path_buf(),
            namespace: package.namespace.clone(),
            manifest,
            spine,
        })
    }

    /// Returns the markup documents of the spine in reading order
    ///
    /// Spine entries that do not resolve through the manifest, or that resolve
    /// to anything other than a markup document, are skipped. A document that
    /// appears several times in the spine is listed once, at its first position.
    pub fn reading_order(&self) -> Vec<PathBuf> {
        let mut ordered = Vec::<PathBuf>::new();

        for item in &self.spine {
            let Some(resource) = self.manifest.get(&item.idref) else {
                warn!("Spine references unknown manifest item \"{}\"", item.idref);
                continue;
            };

            if !resource.is_markup() {
                debug!("Skipping non-markup spine item {}", resource.path.display());
                continue;
            }

            if !ordered.contains(&resource.path) {
                ordered.push(resource.path.clone());
            }
        }

        ordered
    }

    /// Parse the `<manifest>` element
    ///
    /// Every `item` declaring an `href` is resolved against `base_path`, the
    /// directory of the package document. Items without an `href`, or whose
    /// `href` leaves the extraction root, are skipped.
    fn parse_manifest(
        manifest_element: &XmlElement,
        base_path: &Path,
    ) -> HashMap<String, ManifestItem> {
        let mut resources = HashMap::new();

        for element in manifest_element.find_children_by_name("item") {
            let Some(href) = element.get_attr("href") else {
                continue;
            };
            let id = element.get_attr("id").unwrap_or_default().to_string();

            let href = percent_decoded(href).unwrap_or_else(|| href.to_string());
            let Some(path) = resolve_relative_link(base_path, &href) else {
                warn!("Manifest item \"{}\" points outside the publication: {}", id, href);
                continue;
            };

            resources.insert(
                id.clone(),
                ManifestItem {
                    id,
                    path,
                    mime: element.get_attr("media-type").map(str::to_string),
                },
            );
        }

        resources
    }

    /// Parse the `<spine>` element
    fn parse_spine(spine_element: &XmlElement) -> Vec<SpineItem> {
        spine_element
            .find_children_by_name("itemref")
            .filter_map(|element| element.get_attr("idref"))
            .map(|idref| SpineItem {
                idref: idref.to_string(),
            })
            .collect()
    }
}

/// Locates the package document through `META-INF/container.xml`
///
/// The first `rootfile` whose media type marks it as a package document and
/// whose `full-path` exists below `root` is returned.
///
/// ## Return
/// - `Some(PathBuf)`: The package document path, relative to `root`
/// - `None`: The container document is absent or malformed, or names no usable
///   package document; the cause is logged
pub fn locate_package(root: &Path) -> Option<PathBuf> {
    let container_path = root.join(CONTAINER_PATH);
    if !container_path.is_file() {
        warn!("{} not found", CONTAINER_PATH);
        return None;
    }

    let data = match fs::read(&container_path) {
        Ok(data) => data,
        Err(err) => {
            error!("Error reading {}: {}", CONTAINER_PATH, err);
            return None;
        }
    };

    let container = match XmlReader::parse_bytes(&data) {
        Ok(container) => container,
        Err(err) => {
            error!("Invalid XML in {}: {}", CONTAINER_PATH, err);
            return None;
        }
    };

    for rootfile in container.find_elements_by_name("rootfile") {
        if rootfile.get_attr("media-type") != Some(PACKAGE_MEDIA_TYPE) {
            continue;
        }
        let Some(full_path) = rootfile.get_attr("full-path") else {
            continue;
        };
        let Some(package_path) = resolve_relative_link(Path::new(""), full_path) else {
            warn!("Package document path leaves the publication: {}", full_path);
            continue;
        };

        if root.join(&package_path).is_file() {
            return Some(package_path);
        }
        warn!("Package document not found: {}", package_path.display());
    }

    None
}

/// Produces the ordered list of markup documents declared by the publication
///
/// ## Parameters
/// - `root`: The directory the EPUB was extracted into
///
/// ## Return
/// The markup documents in spine order, relative to `root`. The list is empty
/// when the container or package document is missing or malformed.
pub fn ordered_pages(root: &Path) -> Vec<PathBuf> {
    locate_package(root)
        .and_then(|package_path| PackageDocument::open(root, &package_path))
        .map(|package| package.reading_order())
        .unwrap_or_default()
}
