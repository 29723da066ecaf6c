//! Manages the epub doc.
//!
//! Parses the package document: metadata, manifest and spine, and extracts
//! the chapters in reading order.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use percent_encoding::percent_decode_str;

use crate::archive::EpubArchive;
use crate::chapter::Chapter;
use crate::split::SplitWarning;
use crate::xmlutils::{self, XMLNode};

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("Archive Error: {0}")]
    ArchiveError(#[from] crate::archive::ArchiveError),
    #[error("XML Error: {0}")]
    XmlError(#[from] crate::xmlutils::XMLError),
    #[error("I/O Error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid package document: {0}")]
    InvalidPackage(String),
}

/// Title used when neither the package nor the file name provide one.
pub const DEFAULT_TITLE: &str = "Untitled";
/// Creator used when the package doesn't declare one.
pub const DEFAULT_CREATOR: &str = "Unknown";

/// Book level metadata read from the package document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    pub title: Option<String>,
    pub creator: Option<String>,
    /// The identifier referenced by `package@unique-identifier`
    pub identifier: Option<String>,
    pub language: Option<String>,
    /// `dcterms:modified`, if any
    pub modified: Option<String>,
    /// The manifest id of the cover image, if any
    pub cover_id: Option<String>,
}

/// One resource declared in the package manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// href relative to the package document, percent-decoded
    pub href: String,
    /// full path inside the archive
    pub path: String,
    pub media_type: String,
    pub properties: Option<String>,
    /// uncompressed size in the archive, 0 if the entry is missing
    pub size: u64,
}

impl ManifestItem {
    pub fn is_document(&self) -> bool {
        matches!(
            self.media_type.as_str(),
            "application/xhtml+xml" | "text/html" | "application/x-dtbook+xml"
        )
    }

    pub fn is_stylesheet(&self) -> bool {
        self.media_type == "text/css"
    }

    pub fn is_font(&self) -> bool {
        let mt = self.media_type.as_str();
        mt.starts_with("font/")
            || mt.starts_with("application/font-")
            || mt.starts_with("application/x-font-")
            || mt == "application/vnd.ms-opentype"
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    /// The ncx or the epub3 nav document.
    pub fn is_navigation(&self) -> bool {
        self.media_type == "application/x-dtbncx+xml" || self.has_property("nav")
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|p| p.split_whitespace().any(|p| p == property))
    }
}

/// Struct to control the epub document
#[derive(Clone, Debug)]
pub struct EpubDoc<R: Read + Seek> {
    /// the zip archive
    archive: EpubArchive<R>,

    /// epub spine ids, in reading order
    pub spine: Vec<String>,

    /// manifest items, in declaration order
    pub manifest: Vec<ManifestItem>,

    /// metadata read from the package document
    pub metadata: PackageMetadata,

    /// root file base path, without trailing slash
    pub root_base: String,

    /// root file full path
    pub root_file: String,

    /// file name the epub was loaded from, used as the title fallback
    pub source_name: Option<String>,

    /// resources listed in `META-INF/encryption.xml`, if the epub has one
    pub encryption: Option<Vec<String>>,
}

impl EpubDoc<BufReader<File>> {
    /// Opens the epub file in `path`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use epub_split::doc::EpubDoc;
    ///
    /// let doc = EpubDoc::new("book.epub");
    /// assert!(doc.is_ok());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the epub is broken or if the file doesn't
    /// exists.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DocError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut doc = Self::from_reader(BufReader::new(file))?;
        doc.archive.path = path.to_path_buf();
        doc.source_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(doc)
    }
}

impl EpubDoc<Cursor<Vec<u8>>> {
    /// Opens the epub held in memory. `source_name` is the original file
    /// name, used when the package has no title.
    ///
    /// # Errors
    ///
    /// Returns an error if the epub is broken.
    pub fn from_bytes(bytes: Vec<u8>, source_name: &str) -> Result<Self, DocError> {
        let mut doc = Self::from_reader(Cursor::new(bytes))?;
        doc.source_name = Some(source_name.to_string()).filter(|n| !n.is_empty());
        Ok(doc)
    }
}

impl<R: Read + Seek> EpubDoc<R> {
    /// Opens the epub contained in `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container descriptor or the package
    /// document are missing or broken.
    pub fn from_reader(reader: R) -> Result<Self, DocError> {
        let mut archive = EpubArchive::from_reader(reader)?;

        let root_file = archive.root_file()?.to_string_lossy().replace('\\', "/");
        let root_base = parent_dir(&root_file).to_string();
        log::debug!("package document at {root_file}");
        let encryption = archive.encrypted_resources();

        let mut doc = Self {
            archive,
            spine: vec![],
            manifest: vec![],
            metadata: PackageMetadata::default(),
            root_file,
            root_base,
            source_name: None,
            encryption,
        };
        doc.fill_resources()?;
        Ok(doc)
    }

    /// Book title, falling back to the source file name without extension.
    pub fn title(&self) -> String {
        self.metadata
            .title
            .clone()
            .or_else(|| {
                self.source_name.as_deref().and_then(|name| {
                    Path::new(name)
                        .file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                })
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string())
    }

    pub fn creator(&self) -> String {
        self.metadata
            .creator
            .clone()
            .unwrap_or_else(|| DEFAULT_CREATOR.to_string())
    }

    /// Returns the manifest item with this id
    pub fn item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// Returns the resource content by full path in the epub archive
    ///
    /// Returns [`None`] if the path doesn't exist in the epub
    pub fn get_resource_by_path(&mut self, path: &str) -> Option<Vec<u8>> {
        self.archive.get_entry(path).ok()
    }

    /// Returns the resource content by the id defined in the manifest
    ///
    /// Returns [`None`] if the id doesn't exists in the epub
    pub fn get_resource(&mut self, id: &str) -> Option<Vec<u8>> {
        let path = self.item(id)?.path.clone();
        self.get_resource_by_path(&path)
    }

    /// Walks the spine and loads every chapter, in reading order.
    ///
    /// Spine entries that can't be resolved are skipped and reported as
    /// warnings, so the returned chapter indexes stay sequential.
    pub fn chapters(&mut self) -> (Vec<Chapter>, Vec<SplitWarning>) {
        let by_id: HashMap<&str, &ManifestItem> = self
            .manifest
            .iter()
            .map(|item| (item.id.as_str(), item))
            .collect();

        let mut chapters = Vec::with_capacity(self.spine.len());
        let mut warnings = vec![];

        for idref in &self.spine {
            let Some(item) = by_id.get(idref.as_str()) else {
                let warning = SplitWarning::MissingManifestReference {
                    idref: idref.clone(),
                };
                log::warn!("{warning}");
                warnings.push(warning);
                continue;
            };

            match self.archive.get_entry(&item.path) {
                Ok(content) => chapters.push(Chapter::new(chapters.len() + 1, item, content)),
                Err(_) => {
                    let warning = SplitWarning::MissingChapterContent {
                        id: item.id.clone(),
                        path: item.path.clone(),
                    };
                    log::warn!("{warning}");
                    warnings.push(warning);
                }
            }
        }

        log::debug!(
            "extracted {} chapters from {} spine entries",
            chapters.len(),
            self.spine.len()
        );
        (chapters, warnings)
    }

    fn fill_resources(&mut self) -> Result<(), DocError> {
        let package = self.archive.get_entry(&self.root_file).map_err(|_| {
            DocError::InvalidPackage(format!("{} not found in archive", self.root_file))
        })?;
        let root = xmlutils::XMLReader::parse(package.as_slice())
            .map_err(|e| DocError::InvalidPackage(e.to_string()))?;
        let root = root.borrow();

        // resources from manifest
        let manifest = root
            .find("manifest")
            .ok_or_else(|| DocError::InvalidPackage("no manifest".into()))?;
        for r in &manifest.borrow().children {
            let item = r.borrow();
            if item.name.local_name != "item" {
                continue;
            }
            if let Some(item) = self.manifest_item(&item) {
                self.manifest.push(item);
            }
        }

        // items from spine
        let spine = root
            .find("spine")
            .ok_or_else(|| DocError::InvalidPackage("no spine".into()))?;
        for r in &spine.borrow().children {
            if let Some(id) = r.borrow().get_attr("idref") {
                self.spine.push(id);
            }
        }

        // metadata
        if let Some(metadata) = root.find("metadata") {
            let unique_identifier = root.get_attr("unique-identifier");
            self.fill_metadata(&metadata.borrow(), unique_identifier.as_deref());
        }

        log::debug!(
            "{} manifest items, {} spine entries",
            self.manifest.len(),
            self.spine.len()
        );
        Ok(())
    }

    fn manifest_item(&mut self, item: &XMLNode) -> Option<ManifestItem> {
        let id = item.get_attr("id")?;
        let href = item.get_attr("href")?;
        let media_type = item.get_attr("media-type")?;

        let href = percent_decode_str(&href).decode_utf8_lossy().into_owned();
        let path = resolve_path(&self.root_base, &href);
        let size = self.archive.entry_size(&path).unwrap_or(0);

        Some(ManifestItem {
            id,
            href,
            path,
            media_type,
            properties: item.get_attr("properties"),
            size,
        })
    }

    fn fill_metadata(&mut self, metadata: &XMLNode, unique_identifier: Option<&str>) {
        let md = &mut self.metadata;
        md.title = first_text(metadata, &["dc:title", "title"]);
        md.creator = first_text(metadata, &["dc:creator", "creator"]);
        md.language = first_text(metadata, &["dc:language", "language"]);

        let identifiers: Vec<_> = ["dc:identifier", "identifier"]
            .iter()
            .flat_map(|tag| metadata.children_named(tag))
            .collect();
        md.identifier = identifiers
            .iter()
            .find(|node| {
                unique_identifier.is_some() && node.borrow().get_attr("id").as_deref() == unique_identifier
            })
            .or_else(|| identifiers.first())
            .and_then(|node| node.borrow().trimmed_text());

        for r in &metadata.children {
            let item = r.borrow();
            if item.name.local_name != "meta" {
                continue;
            }
            if item.get_attr("property").as_deref() == Some("dcterms:modified") {
                md.modified = item.trimmed_text();
            }
            if item.get_attr("name").as_deref() == Some("cover") {
                md.cover_id = item.get_attr("content");
            }
        }

        // epub3 cover-image property, only when the epub2 meta is absent
        // or points to nothing.
        let cover_known = md
            .cover_id
            .as_deref()
            .is_some_and(|id| self.manifest.iter().any(|item| item.id == id));
        if !cover_known {
            md.cover_id = self
                .manifest
                .iter()
                .find(|item| item.has_property("cover-image"))
                .map(|item| item.id.clone());
        }
    }
}

/// Text of the first child matching one of `tags`, tried in order.
fn first_text(parent: &XMLNode, tags: &[&str]) -> Option<String> {
    tags.iter().find_map(|tag| {
        parent
            .children_named(tag)
            .iter()
            .find_map(|node| node.borrow().trimmed_text())
    })
}

/// Directory part of an archive path, without trailing slash.
pub(crate) fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Joins `href` to the archive directory `base`, resolving `.` and `..`
/// segments. Archive paths always use `/`.
pub(crate) fn resolve_path(base: &str, href: &str) -> String {
    let mut parts: Vec<&str> = if href.starts_with('/') {
        vec![]
    } else {
        base.split('/').filter(|p| !p.is_empty()).collect()
    };

    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    parts.join("/")
}
