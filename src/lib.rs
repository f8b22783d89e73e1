//! EPUB to CBZ conversion
//!
//! A library for turning image-based EPUB publications, typically comics and
//! manga sold as fixed-layout e-books, into CBZ archives that e-readers handle
//! much better.
//!
//! A conversion is a straight pipeline:
//!
//! 1. The EPUB is extracted into a temporary working directory.
//! 2. The reading order is taken from the package document's spine, or, when
//!    the publication declares none, guessed from the page documents found in
//!    its `html/` folder.
//! 3. Every image referenced by those documents is copied under a synthetic,
//!    order-preserving name: the cover first, body pages in reading order,
//!    "created by" trailer pages last.
//! 4. The images are zipped in name order and handed to an external conversion
//!    engine (Kindle Comic Converter by default), which writes the final CBZ.
//!
//! ## Quick Start
//!
//! ```rust, no_run
//! # use std::path::Path;
//! # use epub2cbz::{config::ConverterConfig, converter::Converter, progress::Progress};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let converter = Converter::from_config(ConverterConfig::from_env());
//!
//! let mut progress = Progress::new()
//!     .with_progress(|percent| println!("{percent}%"))
//!     .with_status(|status| println!("{status}"));
//!
//! let cbz = converter.convert(Path::new("book.epub"), Path::new("out"), &mut progress)?;
//! println!("Written to {}", cbz.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `cli` (default): Builds the `epub2cbz` command line tool. Library users can
//!   turn it off to avoid pulling in the command line dependencies.

pub(crate) mod utils;

pub mod archive;
pub mod config;
pub mod converter;
pub mod discovery;
pub mod engine;
pub mod environment;
pub mod error;
pub mod package;
pub mod packager;
pub mod progress;
pub mod staging;
pub mod types;

#[cfg(test)]
mod test_helpers;

pub use converter::Converter;
pub use error::ConvertError;
