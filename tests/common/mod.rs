//! Shared fixtures for the pipeline tests

#![allow(dead_code)]

use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

use epub2cbz::{ConvertError, types::EngineOutput};
use zip::{ZipArchive, ZipWriter, write::SimpleFileOptions};

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default();

    for (name, content) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content).unwrap();
    }

    zip.finish().unwrap();
}

/// Names of the entries of a ZIP archive, in archive order
pub fn zip_entries(path: &Path) -> Vec<String> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|index| archive.by_index(index).unwrap().name().to_string())
        .collect()
}

pub fn container_xml(package_path: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="{package_path}" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#
    )
}

pub fn xhtml_page(images: &[&str]) -> String {
    let body = images
        .iter()
        .map(|src| format!(r#"<p><img src="{src}"/></p>"#))
        .collect::<String>();
    format!(
        r#"<html xmlns="http://www.w3.org/1999/xhtml">
<head><title/></head>
<body>{body}</body>
</html>"#
    )
}

/// `book.epub`: spine `[p1.xhtml, p2.xhtml]` showing `cover.jpg` and `page1.jpg`
pub fn book_epub(path: &Path) {
    let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="p1" href="p1.xhtml" media-type="application/xhtml+xml"/>
    <item id="p2" href="p2.xhtml" media-type="application/xhtml+xml"/>
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
            ("cover.jpg", b"cover".as_slice()),
            ("page1.jpg", b"page one".as_slice()),
        ],
    );
}

/// Stands in for the conversion engine by copying its input to `-o <output>`
pub fn copying_engine(args: &[String]) -> Result<EngineOutput, ConvertError> {
    let (input, output) = (&args[args.len() - 3], &args[args.len() - 1]);
    fs::copy(input, output)?;
    Ok(EngineOutput::with_code(0))
}
