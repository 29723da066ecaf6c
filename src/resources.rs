//! Finds the manifest resources each partition needs.
//!
//! Chapter markup is scanned with a couple of regular expressions instead of
//! a markup parser: anything that looks like a `src`/`href` attribute or a
//! css `url(..)` is considered a reference. This may include a few extra
//! resources but never misses a plainly written one.
//!
//! Stylesheets, fonts and the cover travel with every partition.
//! Stylesheets may pull in images and fonts that aren't scanned here.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::doc::{parent_dir, resolve_path, ManifestItem};
use crate::partition::Partition;
use crate::split::SplitWarning;

/// Manifest ids of the resources copied into one partition, in manifest
/// order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceSet {
    ids: Vec<String>,
}

impl ResourceSet {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

type Strategy<'a> = fn(&ResourceResolver<'a>, &str, &str) -> Option<usize>;

pub struct ResourceResolver<'a> {
    manifest: &'a [ManifestItem],
    root_base: String,
    by_path: HashMap<&'a str, usize>,
    by_name: HashMap<&'a str, Vec<usize>>,
    shared: Vec<usize>,
}

impl<'a> ResourceResolver<'a> {
    pub fn new(manifest: &'a [ManifestItem], root_base: &str, cover_id: Option<&str>) -> Self {
        let mut by_path = HashMap::new();
        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, item) in manifest.iter().enumerate() {
            by_path.entry(item.path.as_str()).or_insert(i);
            let name = item.path.rsplit('/').next().unwrap_or(&item.path);
            by_name.entry(name).or_default().push(i);
        }

        let shared = manifest
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                item.is_stylesheet() || item.is_font() || Some(item.id.as_str()) == cover_id
            })
            .map(|(i, _)| i)
            .collect();

        Self {
            manifest,
            root_base: root_base.to_string(),
            by_path,
            by_name,
            shared,
        }
    }

    /// Resources every partition carries.
    pub fn shared(&self) -> ResourceSet {
        self.set(self.shared.iter().copied().collect())
    }

    /// Total size of the shared resources.
    pub fn shared_size(&self) -> u64 {
        self.shared.iter().map(|&i| self.manifest[i].size).sum()
    }

    /// Collects the resources referenced from the partition chapters plus
    /// the shared ones. References that don't match any manifest item are
    /// reported as warnings.
    pub fn resolve(&self, partition: &Partition) -> (ResourceSet, Vec<SplitWarning>) {
        let mut found: HashSet<usize> = self.shared.iter().copied().collect();
        let mut warnings = vec![];
        let mut unresolved = HashSet::new();

        for chapter in &partition.chapters {
            for reference in scan_references(&chapter.markup()) {
                match self.resolve_reference(&chapter.path, &reference) {
                    Some(i) => {
                        if !self.manifest[i].is_document() && !self.manifest[i].is_navigation() {
                            found.insert(i);
                        }
                    }
                    None => {
                        if unresolved.insert(reference.clone()) {
                            let warning = SplitWarning::ResourceCopy {
                                part: partition.number,
                                reference,
                                chapter: Some(chapter.path.clone()),
                            };
                            log::warn!("{warning}");
                            warnings.push(warning);
                        }
                    }
                }
            }
        }

        (self.set(found), warnings)
    }

    /// Finds the manifest item `reference` points to, as written in the
    /// document at `from`. External and data references resolve to nothing
    /// and are filtered out by [`scan_references`].
    pub fn resolve_reference(&self, from: &str, reference: &str) -> Option<usize> {
        let strategies: [Strategy<'a>; 3] = [
            Self::from_document_dir,
            Self::from_package_dir,
            Self::by_file_name,
        ];
        let dir = parent_dir(from);
        strategies.iter().find_map(|s| s(self, dir, reference))
    }

    pub fn item(&self, index: usize) -> &'a ManifestItem {
        &self.manifest[index]
    }

    fn from_document_dir(&self, dir: &str, reference: &str) -> Option<usize> {
        self.by_path.get(resolve_path(dir, reference).as_str()).copied()
    }

    fn from_package_dir(&self, _dir: &str, reference: &str) -> Option<usize> {
        self.by_path
            .get(resolve_path(&self.root_base, reference).as_str())
            .copied()
    }

    // Only when the name is unambiguous.
    fn by_file_name(&self, _dir: &str, reference: &str) -> Option<usize> {
        let name = reference.rsplit('/').next()?;
        match self.by_name.get(name)?.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    fn set(&self, indexes: HashSet<usize>) -> ResourceSet {
        let mut indexes: Vec<usize> = indexes.into_iter().collect();
        indexes.sort_unstable();
        ResourceSet {
            ids: indexes
                .into_iter()
                .map(|i| self.manifest[i].id.clone())
                .collect(),
        }
    }
}

/// Local resource references found in `markup`, decoded and without
/// fragment or query, in order of appearance.
pub fn scan_references(markup: &str) -> Vec<String> {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    static CSS_URL: OnceLock<Regex> = OnceLock::new();
    let attr = ATTR.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:xlink:href|href|src|poster)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .unwrap()
    });
    let css_url = CSS_URL.get_or_init(|| {
        Regex::new(r#"(?i)\burl\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#).unwrap()
    });

    let mut seen = HashSet::new();
    attr.captures_iter(markup)
        .chain(css_url.captures_iter(markup))
        .filter_map(|c| c.iter().skip(1).flatten().next().map(|m| m.as_str()))
        .filter_map(clean_reference)
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

fn clean_reference(raw: &str) -> Option<String> {
    static SCHEME: OnceLock<Regex> = OnceLock::new();
    let scheme = SCHEME.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*:").unwrap());

    let raw = html_escape::decode_html_entities(raw.trim());
    if raw.is_empty() || raw.starts_with('#') || scheme.is_match(&raw) {
        return None;
    }

    let end = raw.find(|c: char| c == '#' || c == '?').unwrap_or(raw.len());
    let path = percent_decode_str(&raw[..end]).decode_utf8_lossy();
    Some(path.into_owned()).filter(|p| !p.is_empty())
}
