use std::cell::RefCell;
use std::rc::Rc;

use xml::attribute::OwnedAttribute;
use xml::name::OwnedName;
use xml::reader::ParserConfig;
use xml::reader::XmlEvent as ReaderEvent;

// Using RefCell because we need to edit the children vec during the parsing.
// Using rc because a Node will be referenced by its parent and by the
// parsing stack.
pub type ChildNodeRef = Rc<RefCell<XMLNode>>;

#[derive(Debug, thiserror::Error)]
pub enum XMLError {
    #[error("XML Reader Error: {0}")]
    ReaderError(#[from] xml::reader::Error),
    #[error("No XML Elements Found")]
    NoElements,
}

pub struct XMLReader;

impl XMLReader {
    /// Parses `content` into a tree and returns the root element.
    pub fn parse(content: &[u8]) -> Result<ChildNodeRef, XMLError> {
        let reader = ParserConfig::new()
            .add_entity("nbsp", "\u{a0}")
            .add_entity("copy", "©")
            .add_entity("reg", "®")
            .create_reader(content);

        let mut root: Option<ChildNodeRef> = None;
        let mut parents: Vec<ChildNodeRef> = vec![];

        for e in reader {
            match e? {
                ReaderEvent::StartElement {
                    name, attributes, ..
                } => {
                    let node = Rc::new(RefCell::new(XMLNode {
                        name,
                        attrs: attributes,
                        text: None,
                        children: vec![],
                    }));

                    if let Some(current) = parents.last() {
                        current.borrow_mut().children.push(node.clone());
                    }
                    if root.is_none() {
                        root = Some(node.clone());
                    }
                    parents.push(node);
                }
                ReaderEvent::EndElement { .. } => {
                    parents.pop();
                }
                ReaderEvent::Characters(text) | ReaderEvent::CData(text) => {
                    if let Some(current) = parents.last() {
                        current
                            .borrow_mut()
                            .text
                            .get_or_insert_with(String::new)
                            .push_str(&text);
                    }
                }
                _ => continue,
            }
        }

        root.ok_or(XMLError::NoElements)
    }
}

#[derive(Debug)]
pub struct XMLNode {
    pub name: OwnedName,
    pub attrs: Vec<OwnedAttribute>,
    pub text: Option<String>,
    pub children: Vec<ChildNodeRef>,
}

impl XMLNode {
    /// Attribute value by local name, ignoring any prefix.
    pub fn get_attr(&self, name: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|attr| attr.name.local_name == name)
            .map(|attr| attr.value.clone())
    }

    /// First descendant, depth first, with local name `tag`.
    pub fn find(&self, tag: &str) -> Option<ChildNodeRef> {
        for c in &self.children {
            if c.borrow().name.local_name == tag {
                return Some(c.clone());
            }
            if let Some(n) = c.borrow().find(tag) {
                return Some(n);
            }
        }
        None
    }

    /// Every descendant with local name `tag`, in document order.
    pub fn find_all(&self, tag: &str) -> Vec<ChildNodeRef> {
        let mut found = vec![];
        for c in &self.children {
            if c.borrow().name.local_name == tag {
                found.push(c.clone());
            }
            found.extend(c.borrow().find_all(tag));
        }
        found
    }

    /// Direct children whose name matches `tag`.
    ///
    /// `tag` may be qualified (`dc:title`), in which case the prefix has to
    /// match too.
    pub fn children_named(&self, tag: &str) -> Vec<ChildNodeRef> {
        self.children
            .iter()
            .filter(|c| c.borrow().is_named(tag))
            .cloned()
            .collect()
    }

    pub fn is_named(&self, tag: &str) -> bool {
        match tag.split_once(':') {
            Some((prefix, local)) => {
                self.name.prefix.as_deref() == Some(prefix) && self.name.local_name == local
            }
            None => self.name.prefix.is_none() && self.name.local_name == tag,
        }
    }

    /// Trimmed text content, `None` when empty.
    pub fn trimmed_text(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
    }
}
