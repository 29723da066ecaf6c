//! The split pipeline.
//!
//! Parsed doc → chapters → partitions (+ resources) → one epub per
//! partition. Partitions are written one at a time, in order.

use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::archive::ENCRYPTION_PATH;
use crate::doc::{DocError, EpubDoc, PackageMetadata};
use crate::partition::{partition_chapters, Partition};
use crate::resources::ResourceResolver;
use crate::writer::{
    slug, BookInfo, EncodeError, LoadedResource, PartitionWriter, WriteSummary,
    DEFAULT_COMPRESSION_LEVEL,
};

const MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("{0}")]
    Doc(#[from] DocError),
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("The epub has no readable chapters")]
    NoChapters,
    #[error("No partition number {0}")]
    UnknownPartition(usize),
    #[error("Failed to encode part {part}: {source}")]
    Encoding {
        part: usize,
        #[source]
        source: EncodeError,
    },
    #[error("Failed to bundle the parts: {0}")]
    Bundle(#[source] EncodeError),
    #[error("I/O Error: {0}")]
    IOError(#[from] std::io::Error),
}

/// Problems that don't stop the split. They are logged when found and
/// collected on the plan and the output.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SplitWarning {
    #[error("spine item {idref} is not in the manifest, skipped")]
    MissingManifestReference { idref: String },
    #[error("chapter {id} has no content at {path}, skipped")]
    MissingChapterContent { id: String, path: String },
    #[error("part {part}: resource {reference} could not be located")]
    ResourceCopy {
        part: usize,
        reference: String,
        /// the chapter the reference was found in, if any
        chapter: Option<String>,
    },
    #[error("part {part}: chapter {path} clashes with a generated file, skipped")]
    ChapterSkipped { part: usize, path: String },
    #[error("{path} lists {resources} encrypted resources, copied as is and unreadable in the parts")]
    EncryptedResources { path: String, resources: usize },
}

/// Split configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitOptions {
    /// Target size of each output, in megabytes (1024 * 1024 bytes)
    pub target_size_mb: f64,
    /// Output file name prefix, defaults to the source file name
    pub prefix: Option<String>,
    /// Deflate level, 0 to 9
    pub compression_level: i64,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            target_size_mb: 2.0,
            prefix: None,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl SplitOptions {
    pub fn new(target_size_mb: f64) -> Self {
        Self {
            target_size_mb,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    #[must_use]
    pub fn compression_level(mut self, level: i64) -> Self {
        self.compression_level = level;
        self
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn target_bytes(&self) -> u64 {
        (self.target_size_mb * MB) as u64
    }

    fn validate(&self) -> Result<(), SplitError> {
        if !self.target_size_mb.is_finite() || self.target_bytes() == 0 {
            return Err(SplitError::InvalidOptions(format!(
                "target size must be a positive number of megabytes, got {}",
                self.target_size_mb
            )));
        }
        if !(0..=9).contains(&self.compression_level) {
            return Err(SplitError::InvalidOptions(format!(
                "compression level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        if let Some(prefix) = &self.prefix {
            if prefix.is_empty() || prefix.contains(|c: char| c == '/' || c == '\\') {
                return Err(SplitError::InvalidOptions(format!(
                    "invalid file name prefix {prefix:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Chapters grouped into partitions, ready to be written.
#[derive(Clone, Debug)]
pub struct SplitPlan {
    pub book: BookInfo,
    pub metadata: PackageMetadata,
    pub prefix: String,
    pub partitions: Vec<Partition>,
    pub warnings: Vec<SplitWarning>,
    pub target_bytes: u64,
    /// size of the resources every partition carries
    pub shared_bytes: u64,
}

impl SplitPlan {
    pub fn chapter_count(&self) -> usize {
        self.partitions.iter().map(|p| p.chapters.len()).sum()
    }

    /// `{prefix}_part{N}.epub`
    pub fn file_name(&self, part: usize) -> String {
        format!("{}_part{part}.epub", self.prefix)
    }

    pub fn partition(&self, part: usize) -> Option<&Partition> {
        part.checked_sub(1).and_then(|i| self.partitions.get(i))
    }
}

/// One written partition.
#[derive(Clone, Debug)]
pub struct OutputFile {
    pub name: String,
    pub part: usize,
    /// spine entries written
    pub chapters: usize,
    pub bytes: Vec<u8>,
}

/// Every partition written in memory.
#[derive(Clone, Debug)]
pub struct SplitOutput {
    pub prefix: String,
    pub files: Vec<OutputFile>,
    pub warnings: Vec<SplitWarning>,
}

impl SplitOutput {
    /// `{prefix}_parts.zip`
    pub fn bundle_name(&self) -> String {
        format!("{}_parts.zip", self.prefix)
    }

    /// Packs every output file into a single zip.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::Bundle`] if the zip can't be written.
    pub fn bundle(&self) -> Result<Vec<u8>, SplitError> {
        self.encode_bundle().map_err(SplitError::Bundle)
    }

    fn encode_bundle(&self) -> Result<Vec<u8>, EncodeError> {
        // epubs are already compressed
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for file in &self.files {
            zip.start_file(file.name.as_str(), stored)?;
            zip.write_all(&file.bytes)?;
        }
        Ok(zip.finish()?.into_inner())
    }
}

/// Files written by [`Splitter::split_to_dir`].
#[derive(Clone, Debug)]
pub struct SplitReport {
    pub files: Vec<PathBuf>,
    pub warnings: Vec<SplitWarning>,
}

pub struct Splitter {
    options: SplitOptions,
}

impl Splitter {
    /// # Errors
    ///
    /// Returns [`SplitError::InvalidOptions`] for a target size that isn't a
    /// positive number, a compression level out of range or a prefix that
    /// isn't a plain file name.
    pub fn new(options: SplitOptions) -> Result<Self, SplitError> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &SplitOptions {
        &self.options
    }

    /// Extracts the chapters of `doc` and groups them into partitions.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::NoChapters`] if no spine entry could be loaded.
    pub fn plan<R: Read + Seek>(&self, doc: &mut EpubDoc<R>) -> Result<SplitPlan, SplitError> {
        let (chapters, mut warnings) = doc.chapters();
        if chapters.is_empty() {
            return Err(SplitError::NoChapters);
        }

        let resolver =
            ResourceResolver::new(&doc.manifest, &doc.root_base, doc.metadata.cover_id.as_deref());
        let target_bytes = self.options.target_bytes();
        let shared_bytes = resolver.shared_size();

        if let Some(encrypted) = &doc.encryption {
            let warning = SplitWarning::EncryptedResources {
                path: ENCRYPTION_PATH.to_string(),
                resources: encrypted.len(),
            };
            log::warn!("{warning}");
            warnings.push(warning);
        }

        let mut partitions = partition_chapters(chapters, target_bytes, shared_bytes);
        for partition in &mut partitions {
            let (resources, w) = resolver.resolve(partition);
            partition.resources = resources;
            warnings.extend(w);
        }

        let book = BookInfo::from_doc(doc);
        let prefix = self.prefix(doc, &book);
        log::debug!(
            "{} chapters in {} partitions, target {target_bytes} bytes, shared {shared_bytes} bytes",
            partitions.iter().map(|p| p.chapters.len()).sum::<usize>(),
            partitions.len()
        );

        Ok(SplitPlan {
            book,
            metadata: doc.metadata.clone(),
            prefix,
            partitions,
            warnings,
            target_bytes,
            shared_bytes,
        })
    }

    /// Writes partition number `part` of `plan` into `writer`.
    ///
    /// Resources missing from the archive are left out of the output and
    /// reported in the summary warnings.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::Encoding`] if the epub can't be written.
    pub fn write_partition_to<R: Read + Seek, W: Write + Seek>(
        &self,
        doc: &mut EpubDoc<R>,
        plan: &SplitPlan,
        part: usize,
        writer: W,
    ) -> Result<(W, WriteSummary), SplitError> {
        let partition = plan
            .partition(part)
            .ok_or(SplitError::UnknownPartition(part))?;

        let mut warnings = vec![];
        let mut resources = Vec::with_capacity(partition.resources.len());
        for id in partition.resources.ids() {
            let Some(item) = doc.item(id).cloned() else {
                continue;
            };
            match doc.get_resource_by_path(&item.path) {
                Some(content) => resources.push(LoadedResource { item, content }),
                None => {
                    let warning = SplitWarning::ResourceCopy {
                        part,
                        reference: item.path,
                        chapter: None,
                    };
                    log::warn!("{warning}");
                    warnings.push(warning);
                }
            }
        }

        let (writer, mut summary) = PartitionWriter::new(
            &plan.book,
            partition,
            plan.partitions.len(),
            &resources,
            writer,
        )
        .compression_level(self.options.compression_level)
        .write()
        .map_err(|source| SplitError::Encoding { part, source })?;

        warnings.append(&mut summary.warnings);
        summary.warnings = warnings;
        Ok((writer, summary))
    }

    /// Writes partition number `part` of `plan` in memory.
    ///
    /// # Errors
    ///
    /// See [`Self::write_partition_to`].
    pub fn write_partition<R: Read + Seek>(
        &self,
        doc: &mut EpubDoc<R>,
        plan: &SplitPlan,
        part: usize,
    ) -> Result<(Vec<u8>, WriteSummary), SplitError> {
        let (cursor, summary) =
            self.write_partition_to(doc, plan, part, Cursor::new(Vec::new()))?;
        Ok((cursor.into_inner(), summary))
    }

    /// Splits `doc` and writes every partition in memory.
    ///
    /// # Errors
    ///
    /// Fails if the split can't be planned or any partition can't be
    /// written; nothing is returned in that case.
    pub fn split<R: Read + Seek>(&self, doc: &mut EpubDoc<R>) -> Result<SplitOutput, SplitError> {
        let plan = self.plan(doc)?;
        let mut warnings = plan.warnings.clone();
        let mut files = Vec::with_capacity(plan.partitions.len());

        for partition in &plan.partitions {
            let (bytes, summary) = self.write_partition(doc, &plan, partition.number)?;
            warnings.extend(summary.warnings);
            files.push(OutputFile {
                name: plan.file_name(partition.number),
                part: partition.number,
                chapters: summary.chapters,
                bytes,
            });
        }

        Ok(SplitOutput {
            prefix: plan.prefix,
            files,
            warnings,
        })
    }

    /// Splits `doc` writing each partition into `dir` as soon as it's
    /// encoded.
    ///
    /// # Errors
    ///
    /// Fails if the split can't be planned or a partition can't be written.
    /// Files written before the failing partition are kept.
    pub fn split_to_dir<R: Read + Seek>(
        &self,
        doc: &mut EpubDoc<R>,
        dir: &Path,
    ) -> Result<SplitReport, SplitError> {
        let plan = self.plan(doc)?;
        fs::create_dir_all(dir)?;

        let mut warnings = plan.warnings.clone();
        let mut files = vec![];
        for partition in &plan.partitions {
            let part = partition.number;
            let path = dir.join(plan.file_name(part));
            let encoding = |source: std::io::Error| SplitError::Encoding {
                part,
                source: source.into(),
            };

            let file = File::create(&path).map_err(encoding)?;
            let (mut out, summary) =
                self.write_partition_to(doc, &plan, part, BufWriter::new(file))?;
            out.flush().map_err(encoding)?;

            log::info!("wrote {}", path.display());
            warnings.extend(summary.warnings);
            files.push(path);
        }

        Ok(SplitReport { files, warnings })
    }

    fn prefix<R: Read + Seek>(&self, doc: &EpubDoc<R>, book: &BookInfo) -> String {
        if let Some(prefix) = &self.options.prefix {
            return prefix.clone();
        }
        doc.source_name
            .as_deref()
            .and_then(|name| Path::new(name).file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .or_else(|| Some(slug(&book.title)).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "book".to_string())
    }
}

/// Splits the epub in `bytes`, named `source_name`, in memory.
///
/// # Examples
///
/// ```no_run
/// use epub_split::{split_epub, SplitOptions};
///
/// let bytes = std::fs::read("book.epub").unwrap();
/// let output = split_epub(bytes, "book.epub", SplitOptions::new(2.0)).unwrap();
/// for file in &output.files {
///     std::fs::write(&file.name, &file.bytes).unwrap();
/// }
/// ```
///
/// # Errors
///
/// Returns an error if the epub can't be parsed or written.
pub fn split_epub(
    bytes: Vec<u8>,
    source_name: &str,
    options: SplitOptions,
) -> Result<SplitOutput, SplitError> {
    let splitter = Splitter::new(options)?;
    let mut doc = EpubDoc::from_bytes(bytes, source_name)?;
    splitter.split(&mut doc)
}
