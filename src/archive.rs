//! ZIP handling for both ends of the pipeline
//!
//! Extracting the input EPUB, writing the intermediate image archive handed to
//! the conversion engine and checking the archive the engine produced.

use std::{
    fs::{self, File},
    io,
    path::Path,
};

use log::debug;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::{
    error::ConvertError, staging::RASTER_EXTENSIONS, types::StagedImage, utils::has_extension,
};

/// Metadata entry a comic archive may carry besides its images
const COMIC_INFO: &str = "ComicInfo.xml";

/// Extracts an EPUB archive into `dest`
///
/// ## Return
/// - `Ok(())`: Every entry was extracted
/// - `Err(ConvertError::InvalidInput)`: The file is not a ZIP archive
/// - `Err(ConvertError)`: Reading an entry or writing it to disk failed
pub fn extract_epub(input: &Path, dest: &Path) -> Result<(), ConvertError> {
    let file = File::open(input)?;
    let mut archive = ZipArchive::new(file).map_err(|source| ConvertError::InvalidInput {
        path: input.to_path_buf(),
        source,
    })?;

    debug!("Extracting {} entries from {}", archive.len(), input.display());
    archive.extract(dest)?;
    Ok(())
}

/// Writes the staged images into a ZIP archive at `path`
///
/// Entries are added in ascending file-name order, which by construction of
/// the staging names is the page order. Every entry carries the same fixed
/// timestamp so that identical inputs produce identical archives.
///
/// ## Parameters
/// - `images`: The staged images, in any order
/// - `path`: The archive to create; an existing file is overwritten
/// - `on_entry`: Called with `(written, total)` after each entry
pub fn write_image_archive<F>(
    images: &[StagedImage],
    path: &Path,
    mut on_entry: F,
) -> Result<(), ConvertError>
where
    F: FnMut(usize, usize),
{
    let mut ordered = images.iter().collect::<Vec<&StagedImage>>();
    ordered.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut zip = ZipWriter::new(File::create(path)?);
    let total = ordered.len();

    for (index, image) in ordered.into_iter().enumerate() {
        zip.start_file(image.file_name.as_str(), options)?;
        io::copy(&mut File::open(&image.path)?, &mut zip)?;
        on_entry(index + 1, total);
    }

    zip.finish()?;
    debug!("Wrote {} images to {}", total, path.display());
    Ok(())
}

/// Checks that `path` is a usable comic archive
///
/// The archive must contain at least one image entry and nothing besides
/// images, directories and an optional `ComicInfo.xml`.
pub fn validate_output(path: &Path) -> Result<(), ConvertError> {
    let invalid = |reason: String| ConvertError::InvalidOutput {
        path: path.to_path_buf(),
        reason,
    };

    if fs::metadata(path)?.len() == 0 {
        return Err(invalid("the file is empty".to_string()));
    }

    let archive = ZipArchive::new(File::open(path)?).map_err(|err| invalid(err.to_string()))?;

    let mut images = 0;
    for name in archive.file_names() {
        if name.ends_with('/') {
            continue;
        }

        let file_name = name.rsplit('/').next().unwrap_or(name);
        if has_extension(file_name, &RASTER_EXTENSIONS) {
            images += 1;
        } else if !file_name.eq_ignore_ascii_case(COMIC_INFO) {
            return Err(invalid(format!("unexpected entry \"{}\"", name)));
        }
    }

    if images == 0 {
        return Err(invalid("the archive contains no images".to_string()));
    }

    debug!("Output archive {} holds {} images", path.display(), images);
    Ok(())
}
