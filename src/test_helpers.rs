//! Fixtures shared by the unit tests

use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

use tempfile::TempDir;
use zip::{ZipWriter, write::SimpleFileOptions};

use crate::{error::ConvertError, types::EngineOutput};

/// Writes `files` into a fresh temporary directory
///
/// Paths are relative to the directory; parent directories are created.
pub fn extracted_tree(files: &[(&str, &[u8])]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let path = dir.path().join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

/// Writes a ZIP archive; names ending in `/` become directory entries
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default();

    for (name, content) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content).unwrap();
        }
    }

    zip.finish().unwrap();
}

pub fn container_xml(package_path: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
        package_path
    )
}

/// An XHTML page showing each of `images`
pub fn xhtml_page(images: &[&str]) -> String {
    let body = images
        .iter()
        .map(|src| format!(r#"<div><img src="{}" alt=""/></div>"#, src))
        .collect::<String>();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>Page</title></head><body>{}</body></html>"#,
        body
    )
}

/// Writes a two-page EPUB: a cover page and one body page
pub fn sample_epub(path: &Path) {
    let opf = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="p1" href="p1.xhtml" media-type="application/xhtml+xml"/>
    <item id="p2" href="p2.xhtml" media-type="application/xhtml+xml"/>
    <item id="cover" href="cover.jpg" media-type="image/jpeg"/>
    <item id="page1" href="page1.jpg" media-type="image/jpeg"/>
  </manifest>
  <spine><itemref idref="p1"/><itemref idref="p2"/></spine>
</package>"#;

    write_zip(
        path,
        &[
            ("mimetype", b"application/epub+zip".as_slice()),
            ("META-INF/container.xml", container_xml("content.opf").as_bytes()),
            ("content.opf", opf.as_bytes()),
            ("p1.xhtml", xhtml_page(&["cover.jpg"]).as_bytes()),
            ("p2.xhtml", xhtml_page(&["page1.jpg"]).as_bytes()),
            ("cover.jpg", b"cover image".as_slice()),
            ("page1.jpg", b"first page".as_slice()),
        ],
    );
}

/// An engine that copies the intermediate archive to the requested output
pub fn copying_engine() -> impl Fn(&[String]) -> Result<EngineOutput, ConvertError> + Send + Sync {
    |args: &[String]| -> Result<EngineOutput, ConvertError> {
        let (input, output) = (&args[args.len() - 3], &args[args.len() - 1]);
        fs::copy(input, output)?;
        Ok(EngineOutput::with_code(0))
    }
}
