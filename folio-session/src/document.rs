use std::sync::Arc;

use folio_core::{
    is_valid_identifier, CallerContext, ElementId, NavigationState, PageOrientation, PageSpec,
    ResolveError, ResolveWarning, SessionId, Toc, ViewerConfig, NO_RECORD, UNKNOWN_IDENTIFIER,
};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use crate::{Collaborators, DocumentEvent, Resolution};

/// Request parameters and resolved state of one session.
struct DocumentSlot {
    /// Element id looked up for the last identifier, 0 if none.
    requested_element_id: ElementId,
    /// Read once, to name the record in a failed resolution.
    pending_identifier: Option<String>,
    page_request: String,
    logid: Option<String>,
    toc_page: u32,
    thumbnail_page: u32,
    reloads: u32,
    state: Option<NavigationState>,
}

impl Default for DocumentSlot {
    fn default() -> Self {
        Self {
            requested_element_id: 0,
            pending_identifier: None,
            page_request: "1".to_string(),
            logid: None,
            toc_page: 1,
            thumbnail_page: 1,
            reloads: 0,
            state: None,
        }
    }
}

enum Opened {
    State(NavigationState),
    Redirect(String),
}

/// The record currently open in a session.
///
/// Every mutation goes through a single mutex, so concurrent requests of the
/// same session are serialized.
pub struct ActiveDocument {
    collaborators: Collaborators,
    config: Arc<ViewerConfig>,
    session: Option<SessionId>,
    slot: Mutex<DocumentSlot>,
    events: Arc<Mutex<Vec<DocumentEvent>>>,
}

impl ActiveDocument {
    pub fn new(
        collaborators: Collaborators,
        config: Arc<ViewerConfig>,
        session: Option<SessionId>,
    ) -> Self {
        Self {
            collaborators,
            config,
            session,
            slot: Mutex::new(DocumentSlot::default()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn events(&self) -> Arc<Mutex<Vec<DocumentEvent>>> {
        Arc::clone(&self.events)
    }

    /// Selects the record to open. `"-"` unloads the current record.
    pub fn set_identifier(&self, identifier: &str) -> Result<(), ResolveError> {
        let mut slot = self.slot.lock();
        self.set_identifier_locked(&mut slot, identifier)
    }

    /// Sets the requested page or page range. Clears the requested LOGID, so
    /// call this before [`ActiveDocument::set_logid`].
    pub fn set_page(&self, spec: &str) -> Result<(), ResolveError> {
        let spec: PageSpec = spec.parse()?;
        let mut slot = self.slot.lock();
        slot.page_request = spec.to_string();
        slot.logid = None;
        trace!(page = %spec, "page requested");
        Ok(())
    }

    pub fn set_logid(&self, logid: &str) -> Result<(), ResolveError> {
        let logid = logid.trim();
        let value = if logid.is_empty() || logid == NO_RECORD {
            None
        } else if is_valid_identifier(logid) {
            Some(logid.to_string())
        } else {
            return Err(ResolveError::InvalidInput(format!("LOGID '{logid}'")));
        };
        self.slot.lock().logid = value;
        Ok(())
    }

    pub fn set_thumbnail_page(&self, page: u32) {
        self.slot.lock().thumbnail_page = page.max(1);
    }

    /// Sets the TOC pagination page. A loaded TOC is rebuilt when the
    /// corrected page differs from the one it shows.
    pub fn set_toc_page(&self, value: &str) -> Result<(), ResolveError> {
        let requested = value.parse::<PageSpec>()?.first().max(1);
        let mut guard = self.slot.lock();
        let slot = &mut *guard;
        slot.toc_page = requested;
        let Some(state) = slot.state.as_mut() else {
            return Ok(());
        };
        let page_count = state.toc.as_ref().map_or(1, |toc| toc.page_count.max(1));
        let corrected = requested.min(page_count);
        if corrected != state.toc_current_page && self.config.toc_elements_per_page > 0 {
            let toc = self.build_toc(state, corrected)?;
            state.toc_current_page = toc.current_page;
            state.toc = Some(Arc::new(toc));
        } else {
            state.toc_current_page = corrected;
        }
        slot.toc_page = state.toc_current_page;
        Ok(())
    }

    /// Switches between single and double page display, moving the requested
    /// page spec onto the spread around the current page.
    pub fn set_double_page_mode(&self, enabled: bool) -> Option<NavigationState> {
        let mut guard = self.slot.lock();
        let slot = &mut *guard;
        let state = slot.state.as_mut()?;
        if state.double_page_mode != enabled {
            let current = state.current_page_order;
            let request = if enabled && !state.current_page_is_double_image() {
                match (state.current_left_page(), state.current_right_page()) {
                    (Some(left), Some(right)) => Some(format!("{}-{}", left.order, right.order)),
                    (Some(page), None) | (None, Some(page)) => {
                        Some(format!("{0}-{0}", page.order))
                    }
                    (None, None) => None,
                }
            } else if enabled {
                Some(format!("{current}-{current}"))
            } else {
                Some(current.to_string())
            };
            if let Some(request) = request {
                if let Ok(spec) = request.parse() {
                    state.apply_page_spec(spec);
                }
                slot.page_request = request;
            }
        }
        state.double_page_mode = enabled;
        Some(state.clone())
    }

    pub fn toggle_page_orientation(&self) -> Option<PageOrientation> {
        let mut slot = self.slot.lock();
        let state = slot.state.as_mut()?;
        state.toggle_page_orientation();
        Some(state.first_page_orientation)
    }

    /// Loads the requested record and positions it on the requested page and
    /// element. Nothing is published unless every step succeeds.
    #[instrument(skip(self, caller), fields(session = ?self.session))]
    pub fn resolve(&self, caller: &CallerContext) -> Result<Resolution, ResolveError> {
        let mut slot = self.slot.lock();
        self.resolve_locked(&mut slot, caller)
    }

    /// Resolves the record, reloading it once if an element reference went
    /// stale.
    pub fn open(&self, caller: &CallerContext) -> Result<Resolution, ResolveError> {
        let mut slot = self.slot.lock();
        match self.resolve_locked(&mut slot, caller) {
            Err(ResolveError::StaleReference {
                identifier,
                element_id,
            }) => {
                debug!(%identifier, element_id, "stale element, reloading record");
                self.reload_locked(&mut slot, &identifier, caller)
            }
            other => other,
        }
    }

    #[instrument(skip(self, caller), fields(session = ?self.session))]
    pub fn reload(
        &self,
        identifier: &str,
        caller: &CallerContext,
    ) -> Result<Resolution, ResolveError> {
        let mut slot = self.slot.lock();
        self.reload_locked(&mut slot, identifier, caller)
    }

    /// Unloads the record and releases this session's lock on it.
    pub fn reset(&self) {
        let mut slot = self.slot.lock();
        self.reset_locked(&mut slot);
    }

    pub fn state(&self) -> Option<NavigationState> {
        self.slot.lock().state.clone()
    }

    pub fn is_record_loaded(&self) -> bool {
        self.slot.lock().state.is_some()
    }

    pub fn top_element_id(&self) -> ElementId {
        self.slot
            .lock()
            .state
            .as_ref()
            .map_or(0, |state| state.top_element_id)
    }

    pub fn requested_element_id(&self) -> ElementId {
        self.slot.lock().requested_element_id
    }

    pub fn pending_identifier(&self) -> Option<String> {
        self.slot.lock().pending_identifier.clone()
    }

    /// Identifier of the loaded record, `"-"` if none.
    pub fn persistent_identifier(&self) -> String {
        self.slot
            .lock()
            .state
            .as_ref()
            .and_then(|state| state.record_identifier.clone())
            .unwrap_or_else(|| NO_RECORD.to_string())
    }

    pub fn page_request(&self) -> String {
        self.slot.lock().page_request.clone()
    }

    pub fn logid(&self) -> String {
        self.slot
            .lock()
            .logid
            .clone()
            .unwrap_or_else(|| NO_RECORD.to_string())
    }

    pub fn thumb_part(&self) -> String {
        let slot = self.slot.lock();
        match slot.state.as_ref().and_then(|state| state.record_identifier()) {
            Some(identifier) => format!("/{}/{}/", identifier, slot.thumbnail_page),
            None => String::new(),
        }
    }

    pub fn log_part(&self) -> String {
        let slot = self.slot.lock();
        let identifier = slot
            .state
            .as_ref()
            .and_then(|state| state.record_identifier())
            .unwrap_or(NO_RECORD);
        let logid = slot.logid.as_deref().unwrap_or(NO_RECORD);
        format!("/{}/{}/{}/", identifier, slot.page_request, logid)
    }

    fn set_identifier_locked(
        &self,
        slot: &mut DocumentSlot,
        identifier: &str,
    ) -> Result<(), ResolveError> {
        trace!(identifier, "set identifier");
        if !is_valid_identifier(identifier) {
            warn!("invalid identifier '{}'", identifier);
            self.reset_locked(slot);
            return Err(ResolveError::InvalidInput(format!(
                "identifier '{identifier}'"
            )));
        }
        if identifier == NO_RECORD {
            self.reset_locked(slot);
            return Ok(());
        }

        slot.pending_identifier = Some(identifier.to_string());
        if let Some(state) = slot.state.as_ref() {
            if state.record_identifier() == Some(identifier) {
                slot.requested_element_id = state.top_element_id;
                return Ok(());
            }
        }

        match self.collaborators.records.lookup_element_id(identifier)? {
            Some(id) => {
                if slot.requested_element_id != id {
                    slot.requested_element_id = id;
                    trace!(identifier, id, "element id found");
                }
                Ok(())
            }
            None => {
                warn!("no element id found for identifier '{}'", identifier);
                self.reset_locked(slot);
                Err(ResolveError::NotFound(identifier.to_string()))
            }
        }
    }

    fn reset_locked(&self, slot: &mut DocumentSlot) {
        trace!(session = ?self.session, "reset");
        let previous = slot.state.take();
        slot.requested_element_id = 0;
        slot.pending_identifier = None;
        slot.logid = None;

        let Some(identifier) = previous.and_then(|state| state.record_identifier) else {
            return;
        };
        if let Some(session) = self.session {
            self.collaborators.locks.remove_lock(&identifier, session);
        }
        self.events
            .lock()
            .push(DocumentEvent::RecordClosed(identifier));
    }

    fn reload_locked(
        &self,
        slot: &mut DocumentSlot,
        identifier: &str,
        caller: &CallerContext,
    ) -> Result<Resolution, ResolveError> {
        slot.reloads += 1;
        debug!(identifier, reloads = slot.reloads, "reload");
        self.reset_locked(slot);
        if slot.reloads > self.config.max_reloads {
            warn!(identifier, reloads = slot.reloads, "giving up reloading record");
            return Err(ResolveError::NotFound(identifier.to_string()));
        }
        self.set_identifier_locked(slot, identifier)?;
        self.resolve_locked(slot, caller)
    }

    fn resolve_locked(
        &self,
        slot: &mut DocumentSlot,
        caller: &CallerContext,
    ) -> Result<Resolution, ResolveError> {
        let requested = slot.pending_identifier.take();
        if slot.requested_element_id == 0 {
            let marker = requested
                .filter(|identifier| !identifier.is_empty())
                .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string());
            return Err(ResolveError::NotFound(marker));
        }
        debug!(
            element = slot.requested_element_id,
            page = %slot.page_request,
            "resolving"
        );
        let spec: PageSpec = slot.page_request.parse()?;

        let new_record = slot
            .state
            .as_ref()
            .map_or(true, |state| state.top_element_id != slot.requested_element_id);

        let mut candidate = if new_record {
            match self.open_record(slot, requested.as_deref(), caller)? {
                Opened::State(state) => state,
                Opened::Redirect(url) => {
                    self.events
                        .lock()
                        .push(DocumentEvent::Redirected(url.clone()));
                    return Ok(Resolution::Redirect(url));
                }
            }
        } else {
            match slot.state.clone() {
                Some(state) => state,
                None => return Err(ResolveError::NotFound(UNKNOWN_IDENTIFIER.to_string())),
            }
        };
        candidate.warnings.clear();

        let identifier = candidate.record_identifier.clone().unwrap_or_default();
        if let Err(err) = self.position(slot, &mut candidate, spec, requested.as_deref()) {
            if new_record {
                if let Some(session) = self.session {
                    self.collaborators.locks.remove_lock(&identifier, session);
                }
                self.reset_locked(slot);
            }
            return Err(err);
        }

        slot.state = Some(candidate.clone());
        slot.reloads = 0;
        let mut events = self.events.lock();
        if new_record {
            events.push(DocumentEvent::RecordOpened(identifier.clone()));
        }
        events.push(DocumentEvent::RecordViewed(identifier));
        Ok(Resolution::Loaded(candidate))
    }

    /// Loads the top element, checks it may be shown and takes the
    /// concurrent-view lock if the record needs one.
    fn open_record(
        &self,
        slot: &mut DocumentSlot,
        requested: Option<&str>,
        caller: &CallerContext,
    ) -> Result<Opened, ResolveError> {
        let records = &self.collaborators.records;
        let element_id = slot.requested_element_id;

        let top = match records.find_element(element_id)? {
            Some(element) if element.exists => element,
            stale => {
                let identifier = stale
                    .map(|element| element.record_identifier)
                    .filter(|identifier| !identifier.is_empty())
                    .or_else(|| requested.map(str::to_owned));
                info!(
                    ?identifier,
                    element = element_id,
                    "element no longer exists, looking up an updated id"
                );
                let recovered = match identifier.as_deref() {
                    Some(identifier) => match records.lookup_element_id(identifier)? {
                        Some(id) => records.find_element(id)?.filter(|element| element.exists),
                        None => None,
                    },
                    None => None,
                };
                match recovered {
                    Some(element) => {
                        slot.requested_element_id = element.id;
                        element
                    }
                    None => {
                        warn!(?identifier, "no updated id found, record may have been deleted");
                        self.reset_locked(slot);
                        let name = requested
                            .map(str::to_owned)
                            .or(identifier)
                            .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string());
                        return Err(ResolveError::NotFound(name));
                    }
                }
            }
        };

        if top.deleted {
            debug!(
                record = %top.record_identifier,
                "record is deleted and only available as a trace"
            );
            self.reset_locked(slot);
            return Err(ResolveError::Deleted(top.record_identifier));
        }

        let identifier = top.record_identifier.clone();
        if !top.access_conditions.is_empty() {
            let decision = self.collaborators.access.check_list_permission(
                &top.access_conditions,
                &identifier,
                caller,
            )?;
            if let Some(url) = decision.redirect() {
                debug!(record = %identifier, url, "redirecting");
                return Ok(Opened::Redirect(url.to_string()));
            }
            if !decision.granted {
                debug!(record = %identifier, "caller may not list record");
                return Err(ResolveError::NotFound(
                    requested.unwrap_or(&identifier).to_string(),
                ));
            }
        }

        let limit = top.concurrent_view_limit;
        let access_conditions = top.access_conditions.clone();
        let pages = records.page_loader(&top)?;
        let mut state = NavigationState::for_record(top, pages);
        let toc = self.build_toc(&state, slot.toc_page)?;
        state.toc_current_page = toc.current_page;
        slot.toc_page = toc.current_page;
        state.toc = Some(Arc::new(toc));

        if let Err(err) = self.lock_record(&identifier, limit, &access_conditions) {
            self.reset_locked(slot);
            return Err(err);
        }
        Ok(Opened::State(state))
    }

    /// Releases this session's locks on other records, then locks this one
    /// if it has a concurrent-view limit.
    fn lock_record(
        &self,
        identifier: &str,
        limit: Option<u32>,
        access_conditions: &[String],
    ) -> Result<(), ResolveError> {
        let locks = &self.collaborators.locks;
        if let Some(session) = self.session {
            let released = locks.remove_all_locks_except(session, identifier);
            if released > 0 {
                trace!(released, "released locks on other records");
            }
        }

        let Some(limit) = limit else {
            return Ok(());
        };
        if !self
            .collaborators
            .access
            .concurrent_views_limit_enabled(access_conditions)
        {
            return Ok(());
        }
        match self.session {
            Some(session) => Ok(locks.acquire_lock(identifier, session, limit)?),
            None => {
                debug!(record = identifier, "no session, unable to lock limited view record");
                Err(ResolveError::LimitExceeded {
                    identifier: identifier.to_string(),
                    limit,
                })
            }
        }
    }

    /// Narrows the candidate to the requested LOGID and page, then checks the
    /// resulting current element still exists.
    fn position(
        &self,
        slot: &DocumentSlot,
        candidate: &mut NavigationState,
        spec: PageSpec,
        requested: Option<&str>,
    ) -> Result<(), ResolveError> {
        let identifier = candidate.record_identifier.clone().unwrap_or_default();

        if let Some(logid) = slot.logid.as_deref() {
            if candidate.current_logid.as_deref() != Some(logid) {
                self.narrow_to_logid(candidate, &identifier, logid)?;
            }
        }

        candidate.apply_page_spec(spec);
        candidate.double_page_mode = spec.is_range();

        let target = match slot.logid {
            Some(_) => candidate.current_element_id,
            None => candidate
                .pages
                .as_ref()
                .and_then(|pages| pages.owner_element(candidate.current_page_order))
                .unwrap_or(candidate.current_element_id),
        };

        let current = self
            .collaborators
            .records
            .find_element(target)?
            .filter(|element| element.exists && element.belongs_to(&identifier))
            .ok_or_else(|| {
                trace!(element = target, "current element no longer exists");
                ResolveError::StaleReference {
                    identifier: requested.unwrap_or(&identifier).to_string(),
                    element_id: target,
                }
            })?;

        if current.id != candidate.current_element_id {
            candidate.current_logid = current.logid.clone();
        }
        candidate.anchor = current.anchor;
        candidate.volume = current.volume;
        candidate.group = current.group;
        candidate.set_current_element(current);
        Ok(())
    }

    fn narrow_to_logid(
        &self,
        candidate: &mut NavigationState,
        identifier: &str,
        logid: &str,
    ) -> Result<(), ResolveError> {
        debug!(logid, "find element by LOGID");
        let records = &self.collaborators.records;
        let element = match records.find_sub_element_by_logid(identifier, logid)? {
            Some(id) => records.find_element(id)?,
            None => None,
        };
        match element {
            Some(element) if element.belongs_to(identifier) => {
                candidate.set_current_element(element);
                candidate.current_logid = Some(logid.to_string());
            }
            Some(element) => {
                warn!(logid, record = %element.record_identifier, "LOGID belongs to another record");
                candidate.warnings.push(ResolveWarning::ForeignLogicalElement {
                    logid: logid.to_string(),
                    record: element.record_identifier,
                });
            }
            None => {
                warn!("element not found for LOGID '{}'", logid);
                candidate.warnings.push(ResolveWarning::LogicalIdNotFound {
                    logid: logid.to_string(),
                });
            }
        }
        Ok(())
    }

    fn build_toc(&self, state: &NavigationState, requested_page: u32) -> Result<Toc, ResolveError> {
        let Some(top) = state.top_element.as_deref() else {
            return Ok(Toc::default());
        };
        let toc = self.collaborators.toc.build(
            top,
            self.config.list_all_volumes_in_toc,
            top.mime_type.as_deref(),
            requested_page,
        )?;
        Ok(toc)
    }
}
