//! Navigation URLs derived from a resolved [`NavigationState`].

use std::fmt;

use folio_core::{Direction, NavigationState, PageSpec, TocEntry, ViewerConfig, NO_RECORD};
use tracing::{trace, warn};

/// Views a record can be shown in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Image,
    Toc,
    Thumbs,
    Metadata,
    Fulltext,
    Fullscreen,
    Object,
    Calendar,
}

impl PageType {
    pub const ALL: [PageType; 8] = [
        PageType::Image,
        PageType::Toc,
        PageType::Thumbs,
        PageType::Metadata,
        PageType::Fulltext,
        PageType::Fullscreen,
        PageType::Object,
        PageType::Calendar,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PageType::Image => "image",
            PageType::Toc => "toc",
            PageType::Thumbs => "thumbs",
            PageType::Metadata => "metadata",
            PageType::Fulltext => "fulltext",
            PageType::Fullscreen => "fullscreen",
            PageType::Object => "object",
            PageType::Calendar => "calendar",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|page_type| page_type.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct PageUrlBuilder<'a> {
    state: &'a NavigationState,
    config: &'a ViewerConfig,
    current_view: Option<&'a str>,
}

impl<'a> PageUrlBuilder<'a> {
    pub fn new(state: &'a NavigationState, config: &'a ViewerConfig) -> Self {
        Self {
            state,
            config,
            current_view: None,
        }
    }

    /// View the caller is currently on, used when no page type is given.
    pub fn with_current_view(mut self, view: &'a str) -> Self {
        self.current_view = Some(view);
        self
    }

    /// Resolves a page type name, falling back to the current view and then
    /// to the configured default view.
    pub fn page_type(&self, name: &str) -> PageType {
        PageType::from_name(name)
            .or_else(|| self.current_view.and_then(PageType::from_name))
            .or_else(|| PageType::from_name(&self.config.default_page_type))
            .unwrap_or(PageType::Object)
    }

    fn identifier(&self) -> &str {
        self.state.record_identifier().unwrap_or(NO_RECORD)
    }

    fn clamp(&self, order: i64) -> u32 {
        let first = i64::from(self.state.first_page_order());
        let last = i64::from(self.state.last_page_order());
        // last_page_order() never drops below first_page_order()
        order.clamp(first, last) as u32
    }

    /// `{base}/{page_type}/{pi}/{range}/` with both bounds clamped into the
    /// record's page range.
    pub fn page_url(&self, page_type: &str, first: i64, second: Option<i64>) -> String {
        let range = match second {
            Some(second) => PageSpec::Range(self.clamp(first), self.clamp(second)),
            None => PageSpec::Single(self.clamp(first)),
        };
        self.page_url_for_spec(page_type, range)
    }

    pub fn page_url_for_spec(&self, page_type: &str, spec: PageSpec) -> String {
        let spec = spec.clamped(self.state.first_page_order(), self.state.last_page_order());
        format!(
            "{}/{}/{}/{}/",
            self.config.base_url(),
            self.page_type(page_type),
            self.identifier(),
            spec
        )
    }

    pub fn page_url_by_type(&self, page_type: &str) -> String {
        format!(
            "{}/{}/{}/",
            self.config.base_url(),
            self.page_type(page_type),
            self.identifier()
        )
    }

    fn current_spec(&self) -> PageSpec {
        self.state
            .page_spec
            .unwrap_or(PageSpec::Single(self.state.current_page_order))
    }

    /// URL of the page `step` pages away from the current one. In double page
    /// mode the result is the spread `step` spreads away, where a double
    /// image page counts as a whole spread.
    pub fn relative_to_current_page(&self, step: i64) -> String {
        let state = self.state;
        let current = i64::from(state.current_page_order);
        if !state.double_page_mode {
            return self.page_url("", current.saturating_add(step), None);
        }

        if state.current_page_is_double_image() {
            let number = if step < 0 {
                current.saturating_add(step.saturating_mul(2))
            } else {
                current.saturating_add(step)
            };
            return self.page_url("", number, Some(number));
        }

        let (left, right) = if state.rtl {
            (state.current_right_page(), state.current_left_page())
        } else {
            (state.current_left_page(), state.current_right_page())
        };
        let mut number = match (left, right) {
            (Some(left), _) => i64::from(left.order).saturating_add(step),
            // Only a right page, most likely the first page.
            (None, Some(right)) => i64::from(right.order),
            (None, None) => current.saturating_add(step),
        };

        if state.page(number).is_some_and(|page| page.double_image) {
            return self.page_url("", number, Some(number));
        }
        number = number.saturating_add(step);
        if state.page(number).is_some_and(|page| page.double_image) {
            return self.page_url("", number, Some(number));
        }
        trace!(step, number, "relative spread");
        self.page_url("", number, Some(number.saturating_add(1)))
    }

    pub fn previous_page_url(&self, step: i64) -> String {
        self.relative_to_current_page(step.saturating_neg())
    }

    pub fn next_page_url(&self, step: i64) -> String {
        self.relative_to_current_page(step)
    }

    pub fn first_page_url(&self) -> String {
        self.boundary_url(self.state.first_page_order())
    }

    pub fn last_page_url(&self) -> String {
        self.boundary_url(self.state.last_page_order())
    }

    fn boundary_url(&self, order: u32) -> String {
        let order = i64::from(order);
        if self.state.double_page_mode {
            self.page_url("", order, Some(order))
        } else {
            self.page_url("", order, None)
        }
    }

    pub fn image_url(&self) -> String {
        self.page_url_for_spec(PageType::Image.name(), self.current_spec())
    }

    pub fn fulltext_url(&self) -> String {
        self.page_url_for_spec(PageType::Fulltext.name(), self.current_spec())
    }

    pub fn metadata_url(&self) -> String {
        self.page_url_for_spec(PageType::Metadata.name(), self.current_spec())
    }

    /// Fullscreen view of the current spread, or of the requested pages when
    /// not showing two separate pages.
    pub fn fullscreen_image_url(&self) -> String {
        let state = self.state;
        if state.double_page_mode && !state.current_page_is_double_image() {
            if let (Some(left), Some(right)) = (state.current_left_page(), state.current_right_page())
            {
                return self.page_url_for_spec(
                    PageType::Fullscreen.name(),
                    PageSpec::Range(left.order, right.order),
                );
            }
        }
        self.page_url_for_spec(PageType::Fullscreen.name(), self.current_spec())
    }

    /// URL of the nearest navigable docstruct before or after the current
    /// element in the TOC.
    ///
    /// Returns `None` if no docstruct types are navigable for this record or
    /// the current element is not listed in the TOC, and an empty string if
    /// there is no such neighbour. Paths are memoized per current element.
    pub fn docstruct_url(&self, direction: Direction) -> Option<String> {
        let state = self.state;
        let top = state.top_element.as_deref()?;
        let types = self
            .config
            .docstruct_navigation_types(&top.docstruct_type);
        if types.is_empty() {
            return None;
        }

        let path = match state.cached_docstruct_path(direction) {
            Some(path) => path,
            None => {
                let toc = state.toc.as_deref()?;
                let Some(index) = toc.index_of(state.current_element_id) else {
                    warn!(
                        element = state.current_element_id,
                        "current element not found in TOC"
                    );
                    return None;
                };
                let candidates: Box<dyn Iterator<Item = &TocEntry>> = match direction {
                    Direction::Previous => Box::new(toc.entries[..index].iter().rev()),
                    Direction::Next => Box::new(toc.entries[index + 1..].iter()),
                };
                let path = candidates
                    .filter(|entry| {
                        entry
                            .docstruct_type
                            .as_ref()
                            .is_some_and(|kind| types.contains(kind))
                    })
                    .find_map(|entry| {
                        let page: u32 = entry.page_no.as_deref()?.trim().parse().ok()?;
                        let logid = entry.logid.as_deref().unwrap_or(NO_RECORD);
                        trace!(?direction, logid, page, "found docstruct neighbour");
                        Some(format!("/{}/{}/{}/", self.identifier(), page, logid))
                    })
                    .unwrap_or_default();
                state.cache_docstruct_path(direction, path.clone());
                path
            }
        };

        if path.is_empty() {
            return Some(path);
        }
        let view = self.page_type(self.current_view.unwrap_or_default());
        Some(format!("{}/{}{}", self.config.base_url(), view, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{DocstructNavigation, MemoryPageLoader, Page, StructElement, Toc};
    use std::collections::HashMap;
    use std::sync::Arc;

    const BASE: &str = "http://localhost:8080/viewer";

    fn state(count: u32, double_images: &[u32]) -> NavigationState {
        let pages = (1..=count)
            .map(|order| Page {
                double_image: double_images.contains(&order),
                ..Page::new(order)
            })
            .collect();
        let mut top = StructElement::new(1, "PPN123");
        top.docstruct_type = "monograph".into();
        NavigationState::for_record(top, Arc::new(MemoryPageLoader::new(pages, 1)))
    }

    fn with_spec(mut state: NavigationState, spec: &str) -> NavigationState {
        state.apply_page_spec(spec.parse().unwrap());
        state.double_page_mode = spec.contains('-');
        state
    }

    fn spec_of(url: &str) -> String {
        url.trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap()
            .to_string()
    }

    #[test]
    fn page_url_clamps_bounds() {
        let state = state(10, &[]);
        let config = ViewerConfig::default();
        let urls = PageUrlBuilder::new(&state, &config);
        assert_eq!(urls.page_url("image", 12, None), format!("{BASE}/image/PPN123/10/"));
        assert_eq!(urls.page_url("image", -3, Some(2)), format!("{BASE}/image/PPN123/1-2/"));
        assert_eq!(urls.page_url("image", 9, Some(11)), format!("{BASE}/image/PPN123/9-10/"));
    }

    #[test]
    fn unknown_page_type_falls_back() {
        let state = state(3, &[]);
        let config = ViewerConfig::default();
        let urls = PageUrlBuilder::new(&state, &config);
        assert_eq!(urls.page_type(""), PageType::Object);
        assert_eq!(urls.page_type("FullText"), PageType::Fulltext);

        let urls = urls.with_current_view("thumbs");
        assert_eq!(urls.page_type("nonsense"), PageType::Thumbs);
        assert_eq!(urls.page_url_by_type("toc"), format!("{BASE}/toc/PPN123/"));
    }

    #[test]
    fn single_page_mode_steps_by_one() {
        let state = with_spec(state(10, &[]), "4");
        let config = ViewerConfig::default();
        let urls = PageUrlBuilder::new(&state, &config);
        assert_eq!(spec_of(&urls.next_page_url(1)), "5");
        assert_eq!(spec_of(&urls.previous_page_url(1)), "3");
        assert_eq!(spec_of(&urls.previous_page_url(10)), "1");
        assert_eq!(spec_of(&urls.first_page_url()), "1");
        assert_eq!(spec_of(&urls.last_page_url()), "10");
    }

    #[test]
    fn double_page_mode_steps_by_spread() {
        let state = with_spec(state(10, &[]), "4-5");
        let config = ViewerConfig::default();
        let urls = PageUrlBuilder::new(&state, &config);
        assert_eq!(spec_of(&urls.next_page_url(1)), "6-7");
        assert_eq!(spec_of(&urls.previous_page_url(1)), "2-3");
        assert_eq!(spec_of(&urls.first_page_url()), "1-1");
        assert_eq!(spec_of(&urls.last_page_url()), "10-10");
    }

    #[test]
    fn double_page_step_and_inverse_overlap() {
        let config = ViewerConfig::default();
        for spec in ["2-3", "4-5", "6-7"] {
            let original = with_spec(state(10, &[]), spec);
            let forward = PageUrlBuilder::new(&original, &config).next_page_url(1);
            let moved = with_spec(state(10, &[]), &spec_of(&forward));
            let back = PageUrlBuilder::new(&moved, &config).previous_page_url(1);
            assert_eq!(spec_of(&back), spec, "via {forward}");
        }
    }

    #[test]
    fn double_image_neighbours_take_a_whole_spread() {
        let config = ViewerConfig::default();
        let state = with_spec(state(10, &[6]), "4-5");
        let urls = PageUrlBuilder::new(&state, &config);
        assert_eq!(spec_of(&urls.next_page_url(1)), "6-6");

        let state = with_spec(self::state(10, &[6]), "6-6");
        let urls = PageUrlBuilder::new(&state, &config);
        assert_eq!(spec_of(&urls.next_page_url(1)), "7-7");
        assert_eq!(spec_of(&urls.previous_page_url(1)), "4-4");
    }

    #[test]
    fn extreme_steps_are_clamped() {
        let config = ViewerConfig::default();
        let single = with_spec(state(10, &[]), "4");
        let urls = PageUrlBuilder::new(&single, &config);
        assert_eq!(spec_of(&urls.next_page_url(i64::MAX)), "10");
        assert_eq!(spec_of(&urls.next_page_url(i64::MIN)), "1");
        assert_eq!(spec_of(&urls.previous_page_url(i64::MAX)), "1");
        assert_eq!(spec_of(&urls.previous_page_url(i64::MIN)), "10");

        let spread = with_spec(state(10, &[]), "4-5");
        let urls = PageUrlBuilder::new(&spread, &config);
        assert_eq!(spec_of(&urls.next_page_url(i64::MAX)), "10-10");
        assert_eq!(spec_of(&urls.next_page_url(i64::MIN)), "1-1");
        assert_eq!(spec_of(&urls.previous_page_url(i64::MAX)), "1-1");
        assert_eq!(spec_of(&urls.previous_page_url(i64::MIN)), "10-10");

        let double_image = with_spec(state(10, &[6]), "6-6");
        let urls = PageUrlBuilder::new(&double_image, &config);
        assert_eq!(spec_of(&urls.previous_page_url(i64::MAX)), "1-1");
        assert_eq!(spec_of(&urls.next_page_url(i64::MAX)), "10-10");
    }

    #[test]
    fn right_to_left_anchors_on_the_earlier_page() {
        let config = ViewerConfig::default();
        let mut rtl = with_spec(state(10, &[]), "2-3");
        rtl.rtl = true;
        assert_eq!(rtl.current_left_page().map(|page| page.order), Some(3));
        assert_eq!(rtl.current_right_page().map(|page| page.order), Some(2));

        let urls = PageUrlBuilder::new(&rtl, &config);
        assert_eq!(spec_of(&urls.next_page_url(1)), "4-5");
        assert_eq!(spec_of(&urls.previous_page_url(1)), "1-1");
    }

    #[test]
    fn first_page_has_only_a_right_page() {
        let state = with_spec(state(10, &[]), "1-1");
        let config = ViewerConfig::default();
        let urls = PageUrlBuilder::new(&state, &config);
        assert_eq!(spec_of(&urls.next_page_url(1)), "2-3");
    }

    #[test]
    fn fullscreen_shows_current_spread() {
        let state = with_spec(state(10, &[]), "4-5");
        let config = ViewerConfig::default();
        let urls = PageUrlBuilder::new(&state, &config);
        assert_eq!(
            urls.fullscreen_image_url(),
            format!("{BASE}/fullscreen/PPN123/4-5/")
        );
        assert_eq!(urls.image_url(), format!("{BASE}/image/PPN123/4-5/"));
        assert_eq!(urls.metadata_url(), format!("{BASE}/metadata/PPN123/4-5/"));
    }

    fn entry(id: u64, kind: &str, page: Option<&str>, logid: &str) -> TocEntry {
        TocEntry {
            element_id: id,
            logid: Some(logid.into()),
            docstruct_type: Some(kind.into()),
            page_no: page.map(str::to_owned),
            label: logid.into(),
            level: 1,
        }
    }

    fn navigable_state() -> (NavigationState, ViewerConfig) {
        let mut state = state(20, &[]);
        state.toc = Some(Arc::new(Toc {
            entries: vec![
                entry(1, "monograph", Some("1"), "LOG_0000"),
                entry(2, "chapter", Some("3"), "LOG_0001"),
                entry(3, "chapter", None, "LOG_0002"),
                entry(4, "section", Some("9"), "LOG_0003"),
                entry(5, "chapter", Some("12"), "LOG_0004"),
            ],
            current_page: 1,
            page_count: 1,
        }));
        let config = ViewerConfig {
            docstruct_navigation: DocstructNavigation {
                default: vec![],
                types: HashMap::from([("monograph".to_string(), vec!["chapter".to_string()])]),
            },
            ..ViewerConfig::default()
        };
        (state, config)
    }

    #[test]
    fn docstruct_urls_skip_unnavigable_entries() {
        let (mut state, config) = navigable_state();
        state.set_current_element(StructElement::new(4, "PPN123"));
        let urls = PageUrlBuilder::new(&state, &config).with_current_view("image");

        assert_eq!(
            urls.docstruct_url(Direction::Previous).as_deref(),
            Some(format!("{BASE}/image/PPN123/3/LOG_0001/").as_str())
        );
        assert_eq!(
            urls.docstruct_url(Direction::Next).as_deref(),
            Some(format!("{BASE}/image/PPN123/12/LOG_0004/").as_str())
        );
        assert_eq!(state.docstruct_cache_len(), 2);
    }

    #[test]
    fn missing_neighbour_is_cached_as_empty() {
        let (mut state, config) = navigable_state();
        state.set_current_element(StructElement::new(5, "PPN123"));
        let urls = PageUrlBuilder::new(&state, &config);
        assert_eq!(urls.docstruct_url(Direction::Next).as_deref(), Some(""));
        assert_eq!(state.cached_docstruct_path(Direction::Next).as_deref(), Some(""));
    }

    #[test]
    fn docstruct_url_needs_navigable_types_and_toc_entry() {
        let (mut state, config) = navigable_state();
        state.set_current_element(StructElement::new(99, "PPN123"));
        assert_eq!(
            PageUrlBuilder::new(&state, &config).docstruct_url(Direction::Next),
            None
        );

        let config = ViewerConfig::default();
        state.set_current_element(StructElement::new(2, "PPN123"));
        assert_eq!(
            PageUrlBuilder::new(&state, &config).docstruct_url(Direction::Next),
            None
        );
    }
}
