use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::{ElementId, Page, PageLoader, PageOrientation, ResolveError, StructElement, Toc};

static DOUBLE_PAGE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+-\d+$").expect("valid double page pattern"));

/// Returns true if a requested page spec asks for double page display.
pub fn is_double_page_spec(value: &str) -> bool {
    DOUBLE_PAGE_PATTERN.is_match(value.trim())
}

/// A single page or an inclusive page range, written `5` or `5-6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub enum PageSpec {
    Single(u32),
    Range(u32, u32),
}

impl PageSpec {
    pub fn first(&self) -> u32 {
        match *self {
            PageSpec::Single(page) | PageSpec::Range(page, _) => page,
        }
    }

    pub fn second(&self) -> Option<u32> {
        match *self {
            PageSpec::Single(_) => None,
            PageSpec::Range(_, page) => Some(page),
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, PageSpec::Range(..))
    }

    /// Clamps both bounds into `[first, last]`.
    pub fn clamped(self, first: u32, last: u32) -> Self {
        let last = last.max(first);
        match self {
            PageSpec::Single(page) => PageSpec::Single(page.clamp(first, last)),
            PageSpec::Range(a, b) => PageSpec::Range(a.clamp(first, last), b.clamp(first, last)),
        }
    }
}

impl fmt::Display for PageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSpec::Single(page) => write!(f, "{page}"),
            PageSpec::Range(a, b) => write!(f, "{a}-{b}"),
        }
    }
}

impl FromStr for PageSpec {
    type Err = ResolveError;

    /// Accepts `5` or `5-6`. A reversed range is normalized to ascending
    /// order.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ResolveError::InvalidInput(format!("page spec '{value}'"));
        let trimmed = value.trim();
        if is_double_page_spec(trimmed) {
            let (a, b) = trimmed.split_once('-').ok_or_else(invalid)?;
            let a: u32 = a.parse().map_err(|_| invalid())?;
            let b: u32 = b.parse().map_err(|_| invalid())?;
            return Ok(PageSpec::Range(a.min(b), a.max(b)));
        }
        if trimmed.is_empty() || !trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(invalid());
        }
        trimmed.parse().map(PageSpec::Single).map_err(|_| invalid())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Previous,
    Next,
}

/// Memoized docstruct navigation paths, keyed by current element id.
/// An empty string records that no neighbour exists.
#[derive(Debug, Default)]
pub struct DocstructUrlCache {
    previous: HashMap<ElementId, String>,
    next: HashMap<ElementId, String>,
}

impl DocstructUrlCache {
    pub fn get(&self, direction: Direction, element_id: ElementId) -> Option<&str> {
        self.map(direction).get(&element_id).map(String::as_str)
    }

    pub fn insert(&mut self, direction: Direction, element_id: ElementId, path: String) {
        match direction {
            Direction::Previous => self.previous.insert(element_id, path),
            Direction::Next => self.next.insert(element_id, path),
        };
    }

    pub fn len(&self) -> usize {
        self.previous.len() + self.next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn map(&self, direction: Direction) -> &HashMap<ElementId, String> {
        match direction {
            Direction::Previous => &self.previous,
            Direction::Next => &self.next,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolveWarning {
    LogicalIdNotFound { logid: String },
    ForeignLogicalElement { logid: String, record: String },
}

/// What is currently open in a session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NavigationState {
    pub top_element_id: ElementId,
    pub current_element_id: ElementId,
    pub record_identifier: Option<String>,
    pub current_logid: Option<String>,
    pub page_spec: Option<PageSpec>,
    pub current_page_order: u32,
    pub double_page_mode: bool,
    pub anchor: bool,
    pub volume: bool,
    pub group: bool,
    pub rtl: bool,
    pub first_page_orientation: PageOrientation,
    pub toc_current_page: u32,
    pub warnings: Vec<ResolveWarning>,
    #[serde(skip)]
    pub top_element: Option<Arc<StructElement>>,
    #[serde(skip)]
    pub current_element: Option<Arc<StructElement>>,
    #[serde(skip)]
    pub toc: Option<Arc<Toc>>,
    #[serde(skip)]
    pub pages: Option<Arc<dyn PageLoader>>,
    #[serde(skip)]
    docstruct_urls: Arc<Mutex<DocstructUrlCache>>,
}

impl NavigationState {
    /// Fresh state for a newly opened record, positioned on its top element.
    pub fn for_record(top: StructElement, pages: Arc<dyn PageLoader>) -> Self {
        let top = Arc::new(top);
        Self {
            top_element_id: top.id,
            current_element_id: top.id,
            record_identifier: Some(top.record_identifier.clone()),
            current_logid: top.logid.clone(),
            rtl: top.rtl,
            current_page_order: pages.first_page_order(),
            toc_current_page: 1,
            top_element: Some(Arc::clone(&top)),
            current_element: Some(top),
            pages: Some(pages),
            ..Self::default()
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.top_element_id != 0
    }

    pub fn record_identifier(&self) -> Option<&str> {
        self.record_identifier.as_deref()
    }

    /// Points the state at another element of the same record and drops the
    /// docstruct URLs memoized for the previous one.
    pub fn set_current_element(&mut self, element: StructElement) {
        if element.id != self.current_element_id {
            self.docstruct_urls = Arc::default();
        }
        self.current_element_id = element.id;
        self.current_element = Some(Arc::new(element));
    }

    pub fn first_page_order(&self) -> u32 {
        self.pages
            .as_ref()
            .map_or(1, |pages| pages.first_page_order())
    }

    pub fn last_page_order(&self) -> u32 {
        self.pages
            .as_ref()
            .map_or(1, |pages| pages.last_page_order())
            .max(self.first_page_order())
    }

    pub fn page(&self, order: i64) -> Option<Page> {
        let order = u32::try_from(order).ok()?;
        self.pages.as_ref()?.page(order)
    }

    pub fn current_page(&self) -> Option<Page> {
        self.page(i64::from(self.current_page_order))
    }

    pub fn current_page_is_double_image(&self) -> bool {
        self.current_page().is_some_and(|page| page.double_image)
    }

    /// Applies a requested page spec, clamped into the record's page range.
    pub fn apply_page_spec(&mut self, spec: PageSpec) {
        let spec = spec.clamped(self.first_page_order(), self.last_page_order());
        self.current_page_order = spec.first();
        self.page_spec = Some(spec);
    }

    /// Orientation of the first page, inverted when the current page is
    /// flagged as flipped.
    pub fn effective_first_page_orientation(&self) -> PageOrientation {
        if self.current_page().is_some_and(|page| page.flip_recto_verso) {
            self.first_page_orientation.opposite()
        } else {
            self.first_page_orientation
        }
    }

    pub fn toggle_page_orientation(&mut self) {
        self.first_page_orientation = self.first_page_orientation.opposite();
    }

    fn current_orientation(&self) -> PageOrientation {
        let first = self.effective_first_page_orientation();
        let mut orientation = if self.current_page_order % 2 == 0 {
            first.opposite()
        } else {
            first
        };
        if self.rtl {
            orientation = orientation.opposite();
        }
        orientation
    }

    /// Left page of the spread containing the current page.
    pub fn current_left_page(&self) -> Option<Page> {
        let order = i64::from(self.current_page_order);
        match self.current_orientation() {
            PageOrientation::Left => self.page(order),
            PageOrientation::Right if self.rtl => self.page(order + 1),
            PageOrientation::Right => self.page(order - 1),
        }
    }

    /// Right page of the spread containing the current page.
    pub fn current_right_page(&self) -> Option<Page> {
        let order = i64::from(self.current_page_order);
        match self.current_orientation() {
            PageOrientation::Right => self.page(order),
            PageOrientation::Left if self.rtl => self.page(order - 1),
            PageOrientation::Left => self.page(order + 1),
        }
    }

    pub fn cached_docstruct_path(&self, direction: Direction) -> Option<String> {
        self.docstruct_urls
            .lock()
            .get(direction, self.current_element_id)
            .map(str::to_owned)
    }

    pub fn cache_docstruct_path(&self, direction: Direction, path: String) {
        self.docstruct_urls
            .lock()
            .insert(direction, self.current_element_id, path);
    }

    pub fn docstruct_cache_len(&self) -> usize {
        self.docstruct_urls.lock().len()
    }
}
