//! Manages the zip component part of the epub doc.
//!
//! Provides easy methods to read the epub entries and to locate the
//! package document through `META-INF/container.xml`.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::xmlutils::XMLReader;

/// Path of the container descriptor inside every epub.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";
/// Lists the resources encrypted or obfuscated by the publisher.
pub const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O Error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Zip Error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Invalid container: {0}")]
    InvalidContainer(String),
}

/// Epub archive struct. Here it's stored the file path and the list of
/// files in the zip archive.
#[derive(Clone, Debug)]
pub struct EpubArchive<R: Read + Seek> {
    zip: zip::ZipArchive<R>,
    pub path: PathBuf,
    pub files: Vec<String>,
}

impl EpubArchive<BufReader<File>> {
    /// Opens the epub file in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the zip is broken or if the file doesn't
    /// exists.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut archive = Self::from_reader(BufReader::new(file))?;
        archive.path = path.to_path_buf();
        Ok(archive)
    }
}

impl<R: Read + Seek> EpubArchive<R> {
    /// Opens the epub contained in `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the zip is broken.
    pub fn from_reader(reader: R) -> Result<Self, ArchiveError> {
        let zip = zip::ZipArchive::new(reader)?;
        let files = zip.file_names().map(String::from).collect();

        Ok(Self {
            zip,
            path: PathBuf::new(),
            files,
        })
    }

    /// Returns the content of the file by the `name` as `Vec<u8>`.
    ///
    /// Entry names written percent-encoded in the package document are
    /// looked up decoded when the literal name doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the name doesn't exists in the zip archive.
    pub fn get_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let name = self.entry_name(name);
        let mut entry = vec![];
        let mut zipfile = self.zip.by_name(&name)?;
        zipfile.read_to_end(&mut entry)?;
        Ok(entry)
    }

    /// Returns the content of the file by the `name` as `String`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name doesn't exists in the zip archive or
    /// the content isn't valid utf-8.
    pub fn get_entry_as_str(&mut self, name: &str) -> Result<String, ArchiveError> {
        let name = self.entry_name(name);
        let mut entry = String::new();
        let mut zipfile = self.zip.by_name(&name)?;
        zipfile.read_to_string(&mut entry)?;
        Ok(entry)
    }

    /// Uncompressed size of the entry, `None` if it doesn't exist.
    pub fn entry_size(&mut self, name: &str) -> Option<u64> {
        let name = self.entry_name(name);
        self.zip.by_name(&name).ok().map(|f| f.size())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.iter().any(|f| f == name)
    }

    /// Returns the content of container file "META-INF/container.xml".
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidContainer`] if the epub doesn't have
    /// the container file.
    pub fn get_container_file(&mut self) -> Result<Vec<u8>, ArchiveError> {
        self.get_entry(CONTAINER_PATH)
            .map_err(|_| ArchiveError::InvalidContainer(format!("{CONTAINER_PATH} not found")))
    }

    /// Returns the package document path declared in the container file.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidContainer`] if the container file is
    /// missing, isn't valid xml or doesn't reference a package document.
    pub fn root_file(&mut self) -> Result<PathBuf, ArchiveError> {
        let container = self.get_container_file()?;
        get_root_file(&container)
    }

    /// Archive paths listed in `META-INF/encryption.xml`, `None` when the
    /// epub has no encryption descriptor.
    pub fn encrypted_resources(&mut self) -> Option<Vec<String>> {
        let content = self.get_entry(ENCRYPTION_PATH).ok()?;
        match get_cipher_references(&content) {
            Ok(paths) => Some(paths),
            Err(e) => {
                log::warn!("{ENCRYPTION_PATH}: {e}");
                Some(vec![])
            }
        }
    }

    fn entry_name(&self, name: &str) -> String {
        if self.contains(name) {
            return name.to_string();
        }
        match percent_decode_str(name).decode_utf8() {
            Ok(decoded) if self.contains(&decoded) => decoded.into_owned(),
            _ => name.to_string(),
        }
    }
}

/// Reads the package document path out of a container descriptor.
///
/// # Errors
///
/// Returns [`ArchiveError::InvalidContainer`] if there's no
/// `rootfile@full-path`.
pub fn get_root_file(container: &[u8]) -> Result<PathBuf, ArchiveError> {
    let root = XMLReader::parse(container)
        .map_err(|e| ArchiveError::InvalidContainer(e.to_string()))?;
    let el = root.borrow();
    let element = el
        .find("rootfile")
        .ok_or_else(|| ArchiveError::InvalidContainer("rootfile not found".into()))?;
    let el2 = element.borrow();

    let attr = el2
        .get_attr("full-path")
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ArchiveError::InvalidContainer("rootfile has no full-path".into()))?;

    Ok(PathBuf::from(attr.trim()))
}

/// Reads every `CipherReference@URI` of an encryption descriptor,
/// percent-decoded.
///
/// # Errors
///
/// Returns [`ArchiveError::InvalidContainer`] if the descriptor isn't
/// valid xml.
pub fn get_cipher_references(encryption: &[u8]) -> Result<Vec<String>, ArchiveError> {
    let root = XMLReader::parse(encryption)
        .map_err(|e| ArchiveError::InvalidContainer(e.to_string()))?;
    let references = root.borrow().find_all("CipherReference");
    let paths = references
        .iter()
        .filter_map(|r| r.borrow().get_attr("URI"))
        .map(|uri| percent_decode_str(&uri).decode_utf8_lossy().into_owned())
        .collect();
    Ok(paths)
}
