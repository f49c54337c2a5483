use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    AccessChecker, AccessDecision, CallerContext, ElementId, Page, PageLoader, RecordRepository,
    StructElement, Toc, TocBuilder, TocEntry, OPEN_ACCESS,
};

/// Serialized form of a [`MemoryCatalog`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogFixture {
    /// Elements in document order.
    pub elements: Vec<StructElement>,
    /// Pages keyed by record identifier.
    pub pages: HashMap<String, Vec<Page>>,
    pub licenses: Vec<LicenseRule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseRule {
    pub name: String,
    /// Records with this condition may be listed without holding the license.
    pub open: bool,
    pub redirect_url: Option<String>,
    pub concurrent_views_limit: bool,
}

/// Page sequence of one record.
#[derive(Debug, Clone)]
pub struct MemoryPageLoader {
    pages: Vec<Page>,
    default_owner: ElementId,
}

impl MemoryPageLoader {
    /// Pages without an explicit owner are owned by `default_owner`.
    pub fn new(mut pages: Vec<Page>, default_owner: ElementId) -> Self {
        pages.sort_by_key(|page| page.order);
        Self {
            pages,
            default_owner,
        }
    }
}

impl PageLoader for MemoryPageLoader {
    fn first_page_order(&self) -> u32 {
        self.pages.first().map_or(1, |page| page.order)
    }

    fn last_page_order(&self) -> u32 {
        self.pages.last().map_or(1, |page| page.order)
    }

    fn page(&self, order: u32) -> Option<Page> {
        self.pages
            .binary_search_by_key(&order, |page| page.order)
            .ok()
            .map(|index| self.pages[index].clone())
    }

    fn owner_element(&self, order: u32) -> Option<ElementId> {
        self.page(order)
            .map(|page| page.owner.unwrap_or(self.default_owner))
    }
}

/// In-memory index used as repository, TOC builder and access checker.
pub struct MemoryCatalog {
    inner: Mutex<CatalogFixture>,
    toc_page_size: u32,
    lookups: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new(fixture: CatalogFixture) -> Self {
        Self {
            inner: Mutex::new(fixture),
            toc_page_size: 0,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let fixture: CatalogFixture = serde_json::from_str(raw)?;
        Ok(Self::new(fixture))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {:?}", path))?;
        Self::from_json_str(&raw).with_context(|| format!("failed to decode catalog {:?}", path))
    }

    /// Paginates anchor TOCs after `size` volumes; 0 disables pagination.
    pub fn with_toc_page_size(mut self, size: u32) -> Self {
        self.toc_page_size = size;
        self
    }

    /// Number of repository calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn insert_element(&self, element: StructElement) {
        let mut inner = self.inner.lock();
        inner.elements.retain(|existing| existing.id != element.id);
        inner.elements.push(element);
    }

    pub fn set_pages(&self, record_identifier: &str, pages: Vec<Page>) {
        self.inner
            .lock()
            .pages
            .insert(record_identifier.to_string(), pages);
    }

    pub fn add_license(&self, rule: LicenseRule) {
        self.inner.lock().licenses.push(rule);
    }

    pub fn set_exists(&self, id: ElementId, exists: bool) {
        self.update(id, |element| element.exists = exists);
    }

    pub fn mark_deleted(&self, id: ElementId) {
        self.update(id, |element| element.deleted = true);
    }

    /// Gives an element a new id, as a reindex would.
    pub fn reassign_id(&self, id: ElementId, new_id: ElementId) {
        let mut inner = self.inner.lock();
        for element in inner.elements.iter_mut() {
            if element.id == id {
                element.id = new_id;
            }
            if element.parent == Some(id) {
                element.parent = Some(new_id);
            }
        }
        for pages in inner.pages.values_mut() {
            for page in pages.iter_mut().filter(|page| page.owner == Some(id)) {
                page.owner = Some(new_id);
            }
        }
    }

    fn update(&self, id: ElementId, apply: impl Fn(&mut StructElement)) {
        let mut inner = self.inner.lock();
        inner
            .elements
            .iter_mut()
            .filter(|element| element.id == id)
            .for_each(apply);
    }

    fn count_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::SeqCst);
    }

    fn top_of<'a>(elements: &'a [StructElement], record_identifier: &str) -> Option<&'a StructElement> {
        elements.iter().find(|element| {
            element.belongs_to(record_identifier)
                && element.parent.map_or(true, |parent| {
                    !elements
                        .iter()
                        .any(|other| other.id == parent && other.belongs_to(record_identifier))
                })
        })
    }

    fn push_subtree(
        elements: &[StructElement],
        element: &StructElement,
        level: u32,
        entries: &mut Vec<TocEntry>,
    ) {
        entries.push(toc_entry(element, level));
        for child in elements.iter().filter(|child| {
            child.parent == Some(element.id) && child.belongs_to(&element.record_identifier)
        }) {
            Self::push_subtree(elements, child, level + 1, entries);
        }
    }
}

fn toc_entry(element: &StructElement, level: u32) -> TocEntry {
    TocEntry {
        element_id: element.id,
        logid: element.logid.clone(),
        docstruct_type: Some(element.docstruct_type.clone()).filter(|kind| !kind.is_empty()),
        page_no: element.first_page.map(|page| page.to_string()),
        label: element
            .label
            .clone()
            .unwrap_or_else(|| element.record_identifier.clone()),
        level,
    }
}

impl RecordRepository for MemoryCatalog {
    fn find_element(&self, id: ElementId) -> Result<Option<StructElement>> {
        self.count_lookup();
        let inner = self.inner.lock();
        Ok(inner.elements.iter().find(|element| element.id == id).cloned())
    }

    fn find_element_by_identifier(&self, record_identifier: &str) -> Result<Option<StructElement>> {
        self.count_lookup();
        let inner = self.inner.lock();
        Ok(Self::top_of(&inner.elements, record_identifier).cloned())
    }

    fn lookup_element_id(&self, record_identifier: &str) -> Result<Option<ElementId>> {
        self.count_lookup();
        let inner = self.inner.lock();
        Ok(Self::top_of(&inner.elements, record_identifier)
            .filter(|element| element.exists)
            .map(|element| element.id))
    }

    fn find_sub_element_by_logid(
        &self,
        record_identifier: &str,
        logid: &str,
    ) -> Result<Option<ElementId>> {
        self.count_lookup();
        let inner = self.inner.lock();
        Ok(inner
            .elements
            .iter()
            .find(|element| {
                element.belongs_to(record_identifier) && element.logid.as_deref() == Some(logid)
            })
            .map(|element| element.id))
    }

    fn page_loader(&self, top: &StructElement) -> Result<Arc<dyn PageLoader>> {
        let inner = self.inner.lock();
        let pages = inner
            .pages
            .get(&top.record_identifier)
            .cloned()
            .unwrap_or_default();
        Ok(Arc::new(MemoryPageLoader::new(pages, top.id)))
    }
}

impl TocBuilder for MemoryCatalog {
    fn build(
        &self,
        top: &StructElement,
        list_all_volumes: bool,
        _mime_type: Option<&str>,
        requested_page: u32,
    ) -> Result<Toc> {
        let inner = self.inner.lock();
        let elements = &inner.elements;
        let mut entries = Vec::new();
        let mut page_count = 1;
        let mut current_page = 1;

        if top.anchor {
            let volumes: Vec<&StructElement> = elements
                .iter()
                .filter(|element| element.parent == Some(top.id) && element.volume)
                .collect();
            let mut shown = volumes.as_slice();
            if self.toc_page_size > 0 && !volumes.is_empty() {
                let size = self.toc_page_size as usize;
                page_count = volumes.len().div_ceil(size) as u32;
                current_page = requested_page.clamp(1, page_count);
                let start = (current_page as usize - 1) * size;
                shown = &volumes[start..(start + size).min(volumes.len())];
            }
            entries.push(toc_entry(top, 0));
            entries.extend(shown.iter().map(|volume| toc_entry(volume, 1)));
        } else if let Some(anchor) = top
            .parent
            .filter(|_| top.volume && list_all_volumes)
            .and_then(|parent| elements.iter().find(|element| element.id == parent))
        {
            entries.push(toc_entry(anchor, 0));
            for volume in elements
                .iter()
                .filter(|element| element.parent == Some(anchor.id) && element.volume)
            {
                if volume.id == top.id {
                    Self::push_subtree(elements, volume, 1, &mut entries);
                } else {
                    entries.push(toc_entry(volume, 1));
                }
            }
        } else {
            Self::push_subtree(elements, top, 0, &mut entries);
        }

        Ok(Toc {
            entries,
            current_page,
            page_count,
        })
    }
}

impl AccessChecker for MemoryCatalog {
    fn check_list_permission(
        &self,
        access_conditions: &[String],
        _record_identifier: &str,
        caller: &CallerContext,
    ) -> Result<AccessDecision> {
        let inner = self.inner.lock();
        let rule = |name: &str| inner.licenses.iter().find(|rule| rule.name == name);
        let granted = access_conditions.iter().all(|condition| {
            condition == OPEN_ACCESS
                || caller.holds_license(condition)
                || rule(condition.as_str()).is_some_and(|rule| rule.open)
        });
        let redirect_url = access_conditions
            .iter()
            .filter_map(|condition| rule(condition.as_str()))
            .find_map(|rule| rule.redirect_url.clone());
        Ok(AccessDecision {
            granted,
            redirect_url,
        })
    }

    fn concurrent_views_limit_enabled(&self, access_conditions: &[String]) -> bool {
        let inner = self.inner.lock();
        access_conditions.iter().any(|condition| {
            inner
                .licenses
                .iter()
                .any(|rule| &rule.name == condition && rule.concurrent_views_limit)
        })
    }
}
