#![warn(clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::let_underscore_drop,

    // for MSRV
    clippy::unnested_or_patterns,
    clippy::uninlined_format_args,
    clippy::missing_const_for_fn,
)]

//! EPUB splitter
//! lib to split an epub file into several smaller, self-contained epubs
//!
//! Chapters are never reordered or cut: each output holds a contiguous run
//! of the source chapters, grouped so every output stays under a target
//! size, together with the stylesheets, fonts and images those chapters
//! use.
//!
//! # Examples
//!
//! ## Opening
//!
//! ```no_run
//! use epub_split::doc::EpubDoc;
//! let doc = EpubDoc::new("book.epub");
//! assert!(doc.is_ok());
//! let doc = doc.unwrap();
//! println!("{} by {}", doc.title(), doc.creator());
//! ```
//!
//! ## Planning the split
//!
//! ```no_run
//! # use epub_split::doc::EpubDoc;
//! use epub_split::{SplitOptions, Splitter};
//!
//! # let mut doc = EpubDoc::new("book.epub").unwrap();
//! let splitter = Splitter::new(SplitOptions::new(2.0)).unwrap();
//! let plan = splitter.plan(&mut doc).unwrap();
//! for partition in &plan.partitions {
//!     let (first, last) = partition.chapter_range();
//!     println!("{}: chapters {first} to {last}", plan.file_name(partition.number));
//! }
//! ```
//!
//! ## Writing the parts
//!
//! ```no_run
//! # use epub_split::doc::EpubDoc;
//! # use epub_split::{SplitOptions, Splitter};
//! use std::path::Path;
//!
//! # let mut doc = EpubDoc::new("book.epub").unwrap();
//! let splitter = Splitter::new(SplitOptions::new(2.0).prefix("book")).unwrap();
//!
//! // book_part1.epub, book_part2.epub, ...
//! let report = splitter.split_to_dir(&mut doc, Path::new("out")).unwrap();
//! for warning in &report.warnings {
//!     eprintln!("{warning}");
//! }
//! ```

mod xmlutils;

pub mod archive;
pub mod chapter;
pub mod doc;
pub mod partition;
pub mod resources;
pub mod split;
pub mod writer;

pub use split::{
    split_epub, OutputFile, SplitError, SplitOptions, SplitOutput, SplitPlan, SplitReport,
    SplitWarning, Splitter,
};
