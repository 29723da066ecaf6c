#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

/// Zips `files` in order, the `mimetype` entry stored.
pub fn zip_files(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        let method = if *name == "mimetype" {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        zip.start_file(*name, SimpleFileOptions::default().compression_method(method))
            .unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn open_zip(bytes: &[u8]) -> ZipArchive<Cursor<Vec<u8>>> {
    ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap()
}

pub fn read_entry(zip: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
    let mut file = zip.by_name(name).unwrap();
    let mut content = String::new();
    std::io::Read::read_to_string(&mut file, &mut content).unwrap();
    content
}

pub fn chapter_xhtml(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{title}</title><link rel="stylesheet" type="text/css" href="../Styles/style.css"/></head>
<body>{body}</body>
</html>
"#
    )
}

/// A chapter document of exactly `size` bytes.
pub fn sized_chapter(title: &str, size: usize) -> String {
    let empty = chapter_xhtml(title, "");
    assert!(size > empty.len());
    chapter_xhtml(title, &"a".repeat(size - empty.len()))
}

struct Item {
    id: String,
    href: String,
    media_type: String,
    /// `None` when the item is declared but not in the archive
    content: Option<Vec<u8>>,
}

/// An epub built in memory, package document at `OEBPS/content.opf`,
/// chapters under `OEBPS/Text/`.
pub struct TestBook {
    pub title: Option<String>,
    pub creator: Option<String>,
    items: Vec<Item>,
    spine: Vec<String>,
    cover: Option<String>,
    files: Vec<(String, Vec<u8>)>,
}

impl TestBook {
    pub fn new(title: Option<&str>) -> Self {
        Self {
            title: title.map(String::from),
            creator: Some("Jane Doe".into()),
            items: vec![],
            spine: vec![],
            cover: None,
            files: vec![],
        }
    }

    /// Adds `Text/{name}` as chapter `ch{n}`.
    pub fn chapter(mut self, name: &str, markup: &str) -> Self {
        let chapters = self
            .items
            .iter()
            .filter(|i| i.media_type == "application/xhtml+xml")
            .count();
        let id = format!("ch{}", chapters + 1);
        self.items.push(Item {
            id: id.clone(),
            href: format!("Text/{name}"),
            media_type: "application/xhtml+xml".into(),
            content: Some(markup.as_bytes().to_vec()),
        });
        self.spine.push(id);
        self
    }

    /// Adds a manifest resource with id `id`.
    pub fn resource(mut self, id: &str, href: &str, media_type: &str, content: &[u8]) -> Self {
        self.items.push(Item {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            content: Some(content.to_vec()),
        });
        self
    }

    /// Declares a manifest item without adding it to the archive.
    pub fn declared(mut self, id: &str, href: &str, media_type: &str) -> Self {
        self.items.push(Item {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            content: None,
        });
        self
    }

    /// Adds an archive entry outside the manifest.
    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.push((path.into(), content.to_vec()));
        self
    }

    pub fn cover(mut self, id: &str) -> Self {
        self.cover = Some(id.into());
        self
    }

    /// Inserts a spine reference at `position`, whatever it points to.
    pub fn spine_ref(mut self, position: usize, idref: &str) -> Self {
        self.spine.insert(position, idref.into());
        self
    }

    pub fn opf(&self) -> String {
        let mut opf = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="BookId">urn:test:book</dc:identifier>
    <dc:language>en</dc:language>
"#,
        );
        if let Some(title) = &self.title {
            opf.push_str(&format!("    <dc:title>{title}</dc:title>\n"));
        }
        if let Some(creator) = &self.creator {
            opf.push_str(&format!("    <dc:creator>{creator}</dc:creator>\n"));
        }
        if let Some(cover) = &self.cover {
            opf.push_str(&format!("    <meta name=\"cover\" content=\"{cover}\"/>\n"));
        }
        opf.push_str("  </metadata>\n  <manifest>\n");
        for item in &self.items {
            opf.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
                item.id, item.href, item.media_type
            ));
        }
        opf.push_str("  </manifest>\n  <spine>\n");
        for id in &self.spine {
            opf.push_str(&format!("    <itemref idref=\"{id}\"/>\n"));
        }
        opf.push_str("  </spine>\n</package>\n");
        opf
    }

    pub fn build(&self) -> Vec<u8> {
        let opf = self.opf();
        let paths: Vec<String> = self
            .items
            .iter()
            .map(|i| format!("OEBPS/{}", i.href))
            .collect();

        let mut files: Vec<(&str, &[u8])> = vec![
            ("mimetype", &b"application/epub+zip"[..]),
            ("META-INF/container.xml", CONTAINER.as_bytes()),
            ("OEBPS/content.opf", opf.as_bytes()),
        ];
        for (path, item) in paths.iter().zip(&self.items) {
            if let Some(content) = &item.content {
                files.push((path.as_str(), content.as_slice()));
            }
        }
        for (path, content) in &self.files {
            files.push((path.as_str(), content.as_slice()));
        }
        zip_files(&files)
    }
}

/// Three chapters, a stylesheet, a cover and an image used by chapter two.
pub fn small_book() -> TestBook {
    TestBook::new(Some("Small Book"))
        .chapter("one.xhtml", &chapter_xhtml("One", "<p>first</p>"))
        .chapter(
            "two.xhtml",
            &chapter_xhtml("Two", r#"<p><img src="../Images/map.png" alt="map"/></p>"#),
        )
        .chapter(
            "three.xhtml",
            &chapter_xhtml("", "<h1>Third <em>Part</em></h1><p>last</p>"),
        )
        .resource("css", "Styles/style.css", "text/css", b"body { margin: 0 }")
        .resource("map", "Images/map.png", "image/png", b"\x89PNG map")
        .resource("unused", "Images/unused.png", "image/png", b"\x89PNG unused")
        .resource("cover", "Images/cover.jpg", "image/jpeg", b"\xff\xd8 cover")
        .cover("cover")
}
