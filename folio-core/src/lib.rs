use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod catalog;
mod config;
mod error;
mod locks;
mod state;

pub use catalog::{CatalogFixture, LicenseRule, MemoryCatalog, MemoryPageLoader};
pub use config::{DocstructNavigation, ViewerConfig};
pub use error::{LockError, ResolveError};
pub use locks::MemoryRecordLockManager;
pub use state::{
    is_double_page_spec, Direction, DocstructUrlCache, NavigationState, PageSpec, ResolveWarning,
};

/// Index document id of a logical element. `0` never names a real element.
pub type ElementId = u64;
pub type SessionId = Uuid;

/// Identifier value meaning "no record requested".
pub const NO_RECORD: &str = "-";
/// Marker used in not-found errors when no identifier was ever received.
pub const UNKNOWN_IDENTIFIER: &str = "???";
/// Access condition that never requires a license.
pub const OPEN_ACCESS: &str = "OPENACCESS";

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.+~-]+$").expect("valid identifier pattern"));

/// Returns true if `value` is usable as a persistent identifier or LOGID.
pub fn is_valid_identifier(value: &str) -> bool {
    !value.trim().is_empty() && IDENTIFIER_PATTERN.is_match(value)
}

/// A logical (structural) element of a record, as stored in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructElement {
    pub id: ElementId,
    /// Identifier of the record this element belongs to.
    pub record_identifier: String,
    pub logid: Option<String>,
    pub docstruct_type: String,
    pub label: Option<String>,
    pub parent: Option<ElementId>,
    pub exists: bool,
    /// Only a deletion trace is left in the index.
    pub deleted: bool,
    pub anchor: bool,
    pub volume: bool,
    pub group: bool,
    pub rtl: bool,
    pub mime_type: Option<String>,
    pub access_conditions: Vec<String>,
    pub concurrent_view_limit: Option<u32>,
    pub first_page: Option<u32>,
    pub metadata: HashMap<String, Vec<String>>,
}

impl Default for StructElement {
    fn default() -> Self {
        Self {
            id: 0,
            record_identifier: String::new(),
            logid: None,
            docstruct_type: String::new(),
            label: None,
            parent: None,
            exists: true,
            deleted: false,
            anchor: false,
            volume: false,
            group: false,
            rtl: false,
            mime_type: None,
            access_conditions: Vec::new(),
            concurrent_view_limit: None,
            first_page: None,
            metadata: HashMap::new(),
        }
    }
}

impl StructElement {
    pub fn new(id: ElementId, record_identifier: impl Into<String>) -> Self {
        Self {
            id,
            record_identifier: record_identifier.into(),
            ..Self::default()
        }
    }

    pub fn metadata_value(&self, field: &str) -> Option<&str> {
        self.metadata
            .get(field)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn metadata_values(&self, field: &str) -> &[String] {
        self.metadata.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn belongs_to(&self, record_identifier: &str) -> bool {
        self.record_identifier == record_identifier
    }
}

/// A physical page of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub order: u32,
    #[serde(default)]
    pub label: Option<String>,
    /// One scan showing two facing pages (fold-outs, spreads).
    #[serde(default)]
    pub double_image: bool,
    #[serde(default)]
    pub flip_recto_verso: bool,
    /// Logical element owning this page.
    #[serde(default)]
    pub owner: Option<ElementId>,
}

impl Page {
    pub fn new(order: u32) -> Self {
        Self {
            order,
            label: None,
            double_image: false,
            flip_recto_verso: false,
            owner: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageOrientation {
    Left,
    #[default]
    Right,
}

impl PageOrientation {
    pub fn opposite(self) -> Self {
        match self {
            PageOrientation::Left => PageOrientation::Right,
            PageOrientation::Right => PageOrientation::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub element_id: ElementId,
    pub logid: Option<String>,
    pub docstruct_type: Option<String>,
    pub page_no: Option<String>,
    pub label: String,
    pub level: u32,
}

/// Flattened table of contents of a record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Toc {
    pub entries: Vec<TocEntry>,
    /// Pagination page after correction by the builder.
    pub current_page: u32,
    pub page_count: u32,
}

impl Toc {
    pub fn index_of(&self, element_id: ElementId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.element_id == element_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    pub user: Option<String>,
    pub licenses: Vec<String>,
}

impl CallerContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_licenses<I, S>(licenses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user: None,
            licenses: licenses.into_iter().map(Into::into).collect(),
        }
    }

    pub fn holds_license(&self, name: &str) -> bool {
        self.licenses.iter().any(|license| license == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessDecision {
    pub granted: bool,
    pub redirect_url: Option<String>,
}

impl AccessDecision {
    pub fn granted() -> Self {
        Self {
            granted: true,
            redirect_url: None,
        }
    }

    pub fn denied() -> Self {
        Self::default()
    }

    /// Redirect URL, if one is set and not blank.
    pub fn redirect(&self) -> Option<&str> {
        self.redirect_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }
}

pub trait PageLoader: Send + Sync + Debug {
    fn first_page_order(&self) -> u32;
    fn last_page_order(&self) -> u32;
    fn page(&self, order: u32) -> Option<Page>;
    fn owner_element(&self, order: u32) -> Option<ElementId>;

    fn has_pages(&self) -> bool {
        self.page(self.first_page_order()).is_some()
    }
}

pub trait RecordRepository: Send + Sync {
    fn find_element(&self, id: ElementId) -> Result<Option<StructElement>>;
    fn find_element_by_identifier(&self, record_identifier: &str) -> Result<Option<StructElement>>;
    fn lookup_element_id(&self, record_identifier: &str) -> Result<Option<ElementId>>;
    fn find_sub_element_by_logid(
        &self,
        record_identifier: &str,
        logid: &str,
    ) -> Result<Option<ElementId>>;
    fn page_loader(&self, top: &StructElement) -> Result<Arc<dyn PageLoader>>;
}

pub trait RecordLockManager: Send + Sync {
    /// Removes the lock `session` holds on `record_identifier`.
    fn remove_lock(&self, record_identifier: &str, session: SessionId) -> bool;
    /// Removes every lock held by `session` except the one on `keep`.
    fn remove_all_locks_except(&self, session: SessionId, keep: &str) -> usize;
    /// Locks `record_identifier` for `session`. Locking a record the session
    /// already holds only refreshes the existing lock.
    fn acquire_lock(
        &self,
        record_identifier: &str,
        session: SessionId,
        limit: u32,
    ) -> std::result::Result<(), LockError>;
}

pub trait TocBuilder: Send + Sync {
    fn build(
        &self,
        top: &StructElement,
        list_all_volumes: bool,
        mime_type: Option<&str>,
        requested_page: u32,
    ) -> Result<Toc>;
}

pub trait AccessChecker: Send + Sync {
    fn check_list_permission(
        &self,
        access_conditions: &[String],
        record_identifier: &str,
        caller: &CallerContext,
    ) -> Result<AccessDecision>;

    fn concurrent_views_limit_enabled(&self, access_conditions: &[String]) -> bool;
}
