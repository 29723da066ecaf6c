//! Writes one partition as a standalone epub.
//!
//! Chapter and resource files are copied byte for byte and keep their
//! position relative to the package document, so the references inside
//! them keep working. The package document, the ncx and the nav document
//! are regenerated for the partition.

use std::collections::HashSet;
use std::io::{Read, Seek, Write};

use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::doc::{resolve_path, EpubDoc, ManifestItem, DEFAULT_CREATOR};
use crate::partition::Partition;
use crate::split::SplitWarning;

pub const MIMETYPE: &[u8] = b"application/epub+zip";
pub const CONTAINER_PATH: &str = crate::archive::CONTAINER_PATH;
/// Every output puts its package document here.
pub const PACKAGE_PATH: &str = "OEBPS/content.opf";
const CONTENT_DIR: &str = "OEBPS";

/// Default deflate level, a medium size/speed trade-off.
pub const DEFAULT_COMPRESSION_LEVEL: i64 = 6;
const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_MODIFIED: &str = "2000-01-01T00:00:00Z";

// Characters that can't appear raw in a manifest href.
const HREF: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const CONTAINER_XML: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Zip Error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("I/O Error: {0}")]
    IO(#[from] std::io::Error),
}

/// Book level data repeated in every partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookInfo {
    pub title: String,
    pub creator: String,
    pub identifier: String,
    pub language: String,
    pub modified: String,
    pub cover_id: Option<String>,
}

impl BookInfo {
    pub fn from_doc<R: Read + Seek>(doc: &EpubDoc<R>) -> Self {
        let title = doc.title();
        let md = &doc.metadata;
        Self {
            identifier: md
                .identifier
                .clone()
                .unwrap_or_else(|| format!("urn:epub-split:{}", slug(&title))),
            creator: md.creator.clone().unwrap_or_else(|| DEFAULT_CREATOR.into()),
            language: md.language.clone().unwrap_or_else(|| DEFAULT_LANGUAGE.into()),
            modified: md.modified.clone().unwrap_or_else(|| DEFAULT_MODIFIED.into()),
            cover_id: md.cover_id.clone(),
            title,
        }
    }
}

/// A manifest resource with its content, ready to be copied.
#[derive(Clone, Debug)]
pub struct LoadedResource {
    pub item: ManifestItem,
    pub content: Vec<u8>,
}

/// What went into a written partition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// spine entries written
    pub chapters: usize,
    /// chapter and resource files copied
    pub files: usize,
    pub warnings: Vec<SplitWarning>,
}

/// A file of the output package.
struct Entry<'a> {
    id: String,
    /// relative to the package document, decoded
    href: String,
    zip_path: String,
    media_type: &'a str,
    properties: Option<String>,
    content: &'a [u8],
}

struct NavEntry {
    title: String,
    href: String,
}

/// Where everything goes inside the output.
struct Layout<'a> {
    entries: Vec<Entry<'a>>,
    spine: Vec<String>,
    nav: Vec<NavEntry>,
    ncx_href: String,
    nav_href: String,
    cover: Option<String>,
    warnings: Vec<SplitWarning>,
}

impl<'a> Layout<'a> {
    fn new(book: &BookInfo, partition: &'a Partition, resources: &'a [LoadedResource]) -> Self {
        let number = partition.number;
        let mut taken: HashSet<String> = [
            "mimetype".to_string(),
            CONTAINER_PATH.to_string(),
            PACKAGE_PATH.to_string(),
        ]
        .into();
        let mut entries: Vec<Entry<'a>> = vec![];
        let mut spine = vec![];
        let mut nav = vec![];
        let mut warnings = vec![];

        for chapter in &partition.chapters {
            let zip_path = resolve_path(CONTENT_DIR, &chapter.href);
            let id = match entries.iter().find(|e| e.zip_path == zip_path) {
                Some(existing) => existing.id.clone(),
                None if taken.contains(&zip_path) => {
                    let warning = SplitWarning::ChapterSkipped {
                        part: number,
                        path: zip_path,
                    };
                    log::warn!("{warning}");
                    warnings.push(warning);
                    continue;
                }
                None => {
                    let id = format!("p{number}-ch{}", entries.len() + 1);
                    taken.insert(zip_path.clone());
                    entries.push(Entry {
                        id: id.clone(),
                        href: chapter.href.clone(),
                        zip_path,
                        media_type: &chapter.media_type,
                        properties: properties(chapter.properties.as_deref(), "nav", None),
                        content: &chapter.content,
                    });
                    id
                }
            };
            nav.push(NavEntry {
                title: chapter.title.clone(),
                href: chapter.href.clone(),
            });
            spine.push(id);
        }

        let mut cover = None;
        for (i, res) in resources.iter().enumerate() {
            let zip_path = resolve_path(CONTENT_DIR, &res.item.href);
            if !taken.insert(zip_path.clone()) {
                continue;
            }
            let id = format!("p{number}-res{}", i + 1);
            let is_cover = book.cover_id.as_deref() == Some(res.item.id.as_str());
            if is_cover {
                cover = Some(id.clone());
            }
            entries.push(Entry {
                id,
                href: res.item.href.clone(),
                zip_path,
                media_type: &res.item.media_type,
                properties: properties(
                    res.item.properties.as_deref(),
                    "cover-image",
                    is_cover.then_some("cover-image"),
                ),
                content: &res.content,
            });
        }

        let ncx_href = free_name(&taken, "toc", "ncx");
        let nav_href = free_name(&taken, "nav", "xhtml");

        Self {
            entries,
            spine,
            nav,
            ncx_href,
            nav_href,
            cover,
            warnings,
        }
    }
}

/// Writes a [`Partition`] as an epub into `W`.
pub struct PartitionWriter<'a, W: Write + Seek> {
    book: &'a BookInfo,
    partition: &'a Partition,
    total: usize,
    resources: &'a [LoadedResource],
    zip: ZipWriter<W>,
    stored: SimpleFileOptions,
    deflated: SimpleFileOptions,
}

impl<'a, W: Write + Seek> PartitionWriter<'a, W> {
    /// `total` is the number of partitions of the book, `resources` the
    /// loaded content of `partition.resources`.
    pub fn new(
        book: &'a BookInfo,
        partition: &'a Partition,
        total: usize,
        resources: &'a [LoadedResource],
        writer: W,
    ) -> Self {
        Self {
            book,
            partition,
            total,
            resources,
            zip: ZipWriter::new(writer),
            stored: SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
            deflated: SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(DEFAULT_COMPRESSION_LEVEL)),
        }
    }

    /// Deflate level for every entry but the mimetype.
    pub fn compression_level(mut self, level: i64) -> Self {
        self.deflated = self.deflated.compression_level(Some(level));
        self
    }

    /// Writes the whole package and returns the inner writer.
    ///
    /// Chapters whose path is taken by a generated file are left out and
    /// reported in the summary.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the zip can't be written.
    pub fn write(mut self) -> Result<(W, WriteSummary), EncodeError> {
        let layout = Layout::new(self.book, self.partition, self.resources);

        self.write_mimetype()?;
        self.write_container()?;
        self.write_package(&layout)?;
        self.write_navigation(&layout)?;
        self.write_contents(&layout)?;

        let writer = self.zip.finish()?;
        let summary = WriteSummary {
            chapters: layout.spine.len(),
            files: layout.entries.len(),
            warnings: layout.warnings,
        };
        log::info!(
            "part {}: {} chapters, {} files",
            self.partition.number,
            summary.chapters,
            summary.files
        );
        Ok((writer, summary))
    }

    fn write_mimetype(&mut self) -> Result<(), EncodeError> {
        // must be the first entry, uncompressed
        self.zip.start_file("mimetype", self.stored)?;
        self.zip.write_all(MIMETYPE)?;
        Ok(())
    }

    fn write_container(&mut self) -> Result<(), EncodeError> {
        self.zip.start_file(CONTAINER_PATH, self.deflated)?;
        self.zip.write_all(CONTAINER_XML)?;
        Ok(())
    }

    fn write_package(&mut self, layout: &Layout) -> Result<(), EncodeError> {
        let opf = self.package_document(layout);
        self.zip.start_file(PACKAGE_PATH, self.deflated)?;
        self.zip.write_all(opf.as_bytes())?;
        Ok(())
    }

    fn write_navigation(&mut self, layout: &Layout) -> Result<(), EncodeError> {
        let ncx = self.ncx(layout);
        self.zip
            .start_file(resolve_path(CONTENT_DIR, &layout.ncx_href), self.deflated)?;
        self.zip.write_all(ncx.as_bytes())?;

        let nav = self.nav_document(layout);
        self.zip
            .start_file(resolve_path(CONTENT_DIR, &layout.nav_href), self.deflated)?;
        self.zip.write_all(nav.as_bytes())?;
        Ok(())
    }

    fn write_contents(&mut self, layout: &Layout) -> Result<(), EncodeError> {
        for entry in &layout.entries {
            self.zip.start_file(entry.zip_path.as_str(), self.deflated)?;
            self.zip.write_all(entry.content)?;
        }
        Ok(())
    }

    fn title(&self) -> String {
        format!(
            "{} (Part {} of {})",
            self.book.title, self.partition.number, self.total
        )
    }

    fn package_document(&self, layout: &Layout) -> String {
        let book = self.book;
        let mut opf = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
"#,
        );
        opf.push_str(&format!(
            "    <dc:identifier id=\"BookId\">{}-part{}</dc:identifier>\n",
            text(&book.identifier),
            self.partition.number
        ));
        opf.push_str(&format!("    <dc:title>{}</dc:title>\n", text(&self.title())));
        opf.push_str(&format!(
            "    <dc:creator>{}</dc:creator>\n",
            text(&book.creator)
        ));
        opf.push_str(&format!(
            "    <dc:language>{}</dc:language>\n",
            text(&book.language)
        ));
        opf.push_str(&format!(
            "    <meta property=\"dcterms:modified\">{}</meta>\n",
            text(&book.modified)
        ));
        if let Some(cover) = &layout.cover {
            opf.push_str(&format!(
                "    <meta name=\"cover\" content=\"{}\"/>\n",
                attr(cover)
            ));
        }
        opf.push_str("  </metadata>\n");

        opf.push_str("  <manifest>\n");
        opf.push_str(&format!(
            "    <item id=\"ncx\" href=\"{}\" media-type=\"application/x-dtbncx+xml\"/>\n",
            attr(&encode_href(&layout.ncx_href))
        ));
        opf.push_str(&format!(
            "    <item id=\"nav\" href=\"{}\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
            attr(&encode_href(&layout.nav_href))
        ));
        for entry in &layout.entries {
            opf.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"",
                attr(&entry.id),
                attr(&encode_href(&entry.href)),
                attr(entry.media_type)
            ));
            if let Some(properties) = &entry.properties {
                opf.push_str(&format!(" properties=\"{}\"", attr(properties)));
            }
            opf.push_str("/>\n");
        }
        opf.push_str("  </manifest>\n");

        opf.push_str("  <spine toc=\"ncx\">\n");
        for id in &layout.spine {
            opf.push_str(&format!("    <itemref idref=\"{}\"/>\n", attr(id)));
        }
        opf.push_str("  </spine>\n</package>\n");
        opf
    }

    fn ncx(&self, layout: &Layout) -> String {
        let mut ncx = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
"#,
        );
        ncx.push_str(&format!(
            "    <meta name=\"dtb:uid\" content=\"{}-part{}\"/>\n",
            attr(&self.book.identifier),
            self.partition.number
        ));
        ncx.push_str(
            r#"    <meta name="dtb:depth" content="1"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
"#,
        );
        ncx.push_str(&format!(
            "  <docTitle><text>{}</text></docTitle>\n",
            text(&self.title())
        ));
        ncx.push_str("  <navMap>\n");
        for (i, point) in layout.nav.iter().enumerate() {
            let order = i + 1;
            ncx.push_str(&format!(
                "    <navPoint id=\"navPoint-{order}\" playOrder=\"{order}\">\n"
            ));
            ncx.push_str(&format!(
                "      <navLabel><text>{}</text></navLabel>\n",
                text(&point.title)
            ));
            ncx.push_str(&format!(
                "      <content src=\"{}\"/>\n",
                attr(&encode_href(&point.href))
            ));
            ncx.push_str("    </navPoint>\n");
        }
        ncx.push_str("  </navMap>\n</ncx>\n");
        ncx
    }

    fn nav_document(&self, layout: &Layout) -> String {
        let title = self.title();
        let lang = attr(&self.book.language);
        let mut nav = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="{lang}" xml:lang="{lang}">
<head>
  <title>{}</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>{}</h1>
    <ol>
"#,
            text(&title),
            text(&title)
        );
        for point in &layout.nav {
            nav.push_str(&format!(
                "      <li><a href=\"{}\">{}</a></li>\n",
                attr(&encode_href(&point.href)),
                text(&point.title)
            ));
        }
        nav.push_str("    </ol>\n  </nav>\n</body>\n</html>\n");
        nav
    }
}

/// Original properties without `drop`, plus `add`.
fn properties(original: Option<&str>, drop: &str, add: Option<&str>) -> Option<String> {
    let props: Vec<&str> = original
        .unwrap_or_default()
        .split_whitespace()
        .filter(|p| *p != drop)
        .chain(add)
        .collect();
    Some(props.join(" ")).filter(|p| !p.is_empty())
}

/// First of `stem.ext`, `stem-1.ext`, ... not used by a copied file.
fn free_name(taken: &HashSet<String>, stem: &str, ext: &str) -> String {
    (0..)
        .map(|n| match n {
            0 => format!("{stem}.{ext}"),
            n => format!("{stem}-{n}.{ext}"),
        })
        .find(|name| !taken.contains(&resolve_path(CONTENT_DIR, name)))
        .unwrap_or_else(|| format!("{stem}.{ext}"))
}

fn encode_href(href: &str) -> String {
    utf8_percent_encode(href, HREF).to_string()
}

/// Lowercase ascii alphanumerics, everything else collapsed into `-`.
pub(crate) fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::chapter::Chapter;
    use crate::resources::ResourceSet;

    #[test]
    fn test_properties() {
        assert_eq!(properties(Some("nav scripted"), "nav", None).as_deref(), Some("scripted"));
        assert_eq!(properties(Some("nav"), "nav", None), None);
        assert_eq!(
            properties(None, "cover-image", Some("cover-image")).as_deref(),
            Some("cover-image")
        );
    }

    #[test]
    fn test_free_name() {
        let mut taken = HashSet::new();
        assert_eq!(free_name(&taken, "nav", "xhtml"), "nav.xhtml");
        taken.insert("OEBPS/nav.xhtml".to_string());
        taken.insert("OEBPS/nav-1.xhtml".to_string());
        assert_eq!(free_name(&taken, "nav", "xhtml"), "nav-2.xhtml");
    }

    #[test]
    fn test_encode_href() {
        assert_eq!(encode_href("Text/ch 1.xhtml"), "Text/ch%201.xhtml");
        assert_eq!(encode_href("../Images/a.png"), "../Images/a.png");
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Tom & Jerry: The Book!"), "tom-jerry-the-book");
        assert_eq!(slug("  "), "");
    }

    fn book() -> BookInfo {
        BookInfo {
            title: "Book".into(),
            creator: "Someone".into(),
            identifier: "urn:book".into(),
            language: "en".into(),
            modified: DEFAULT_MODIFIED.into(),
            cover_id: None,
        }
    }

    fn chapter(index: usize, href: &str) -> Chapter {
        let item = ManifestItem {
            id: format!("c{index}"),
            href: href.into(),
            path: format!("OEBPS/{href}"),
            media_type: "application/xhtml+xml".into(),
            properties: None,
            size: 0,
        };
        let markup = format!("<html><head><title>C{index}</title></head><body/></html>");
        Chapter::new(index, &item, markup.into_bytes())
    }

    #[test]
    fn clashing_chapter_is_skipped() {
        let partition = Partition {
            number: 2,
            chapters: vec![chapter(1, "Text/one.xhtml"), chapter(2, "content.opf")],
            resources: ResourceSet::default(),
            size: 0,
        };
        let book = book();
        let (cursor, summary) =
            PartitionWriter::new(&book, &partition, 3, &[], Cursor::new(vec![]))
                .write()
                .unwrap();

        assert_eq!(summary.chapters, 1);
        assert_eq!(summary.files, 1);
        assert_eq!(
            summary.warnings,
            vec![SplitWarning::ChapterSkipped {
                part: 2,
                path: "OEBPS/content.opf".into(),
            }]
        );

        let mut zip = zip::ZipArchive::new(cursor).unwrap();
        let mut opf = String::new();
        zip.by_name(PACKAGE_PATH)
            .unwrap()
            .read_to_string(&mut opf)
            .unwrap();
        assert!(opf.contains("<dc:title>Book (Part 2 of 3)</dc:title>"));
        assert!(opf.contains(r#"<itemref idref="p2-ch1"/>"#));
        assert!(!opf.contains("p2-ch2"));
    }
}
