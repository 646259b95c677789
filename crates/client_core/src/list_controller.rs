use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use shared::{error::FieldErrors, protocol::Page};
use tracing::{debug, warn};
use url::Url;

use crate::{
    confirm::Confirm,
    error::ListError,
    types::{DestroyOutcome, FetchOutcome, ListState, LoadMoreOutcome, Record, SubmitOutcome},
};

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this item?";
/// Empty query for calls that need no extra parameters.
pub const NO_PARAMS: &[(&str, &str)] = &[];

#[derive(Debug, Deserialize)]
struct ValidationBody {
    #[serde(default)]
    errors: FieldErrors,
}

struct Inner<T> {
    items: Vec<T>,
    total: u64,
    next_page_url: Option<String>,
    current_page: u64,
    selected: Option<T>,
    is_open: bool,
    errors: FieldErrors,
    load_more_error: Option<String>,
    /// URL of the last applied fetch; relative next-page links resolve against it.
    base_url: Option<Url>,
    /// Bumped on every open/close so a late submit only closes the session it started in.
    session: u64,
}

impl<T> Default for Inner<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            next_page_url: None,
            current_page: 1,
            selected: None,
            is_open: false,
            errors: FieldErrors::new(),
            load_more_error: None,
            base_url: None,
            session: 0,
        }
    }
}

impl<T> Inner<T> {
    fn close_sheet(&mut self) {
        self.errors.clear();
        self.selected = None;
        self.is_open = false;
        self.session += 1;
    }
}

/// Holds a busy counter up for as long as it lives.
struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn acquire(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drives a paginated, searchable list of `T` against a resource endpoint,
/// together with one create-or-edit session and confirmed deletes.
///
/// All operations take `&self`; overlapping calls are allowed. The state lock
/// is never held across a request, so calls interleave only while waiting on
/// the network. The newest `fetch` always wins over older ones.
pub struct ListController<T: Record> {
    http: Client,
    confirm: Arc<dyn Confirm>,
    inner: Mutex<Inner<T>>,
    fetches_in_flight: AtomicUsize,
    submits_in_flight: AtomicUsize,
    fetch_sequence: AtomicU64,
}

impl<T: Record> ListController<T> {
    pub fn new(confirm: Arc<dyn Confirm>) -> Self {
        Self::with_client(Client::new(), confirm)
    }

    /// Uses `http` for every request; timeouts and default headers are its policy.
    pub fn with_client(http: Client, confirm: Arc<dyn Confirm>) -> Self {
        Self {
            http,
            confirm,
            inner: Mutex::new(Inner::default()),
            fetches_in_flight: AtomicUsize::new(0),
            submits_in_flight: AtomicUsize::new(0),
            fetch_sequence: AtomicU64::new(0),
        }
    }

    /// Loads the first page of `url` with `params` as the query string and
    /// replaces the collection with it.
    pub async fn fetch<P>(&self, url: &str, params: &P) -> Result<FetchOutcome, ListError>
    where
        P: Serialize + ?Sized,
    {
        let base = Url::parse(url)?;
        let _busy = BusyGuard::acquire(&self.fetches_in_flight);
        // An unparseable url never supersedes a fetch in flight.
        let token = self.fetch_sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let page = self.get_page(base.clone(), params).await.inspect_err(|err| {
            warn!(%url, error = %err, "fetch failed");
        })?;

        let mut inner = self.lock();
        if self.fetch_sequence.load(Ordering::SeqCst) != token {
            debug!(%url, token, "dropping superseded fetch response");
            return Ok(FetchOutcome::Superseded);
        }

        let mut items = Vec::with_capacity(page.data.len());
        for record in page.data {
            if !contains_id(&items, &record.id()) {
                items.push(record);
            }
        }
        debug!(%url, count = items.len(), total = page.total, "fetched page");

        inner.items = items;
        inner.total = page.total;
        inner.next_page_url = page.next_page_url;
        inner.current_page = page.current_page;
        inner.load_more_error = None;
        inner.base_url = Some(base);
        Ok(FetchOutcome::Applied)
    }

    /// Appends the next page, skipping records already in the list.
    ///
    /// Does nothing when there is no next page. A failure is kept in
    /// `load_more_error` as well as returned.
    pub async fn load_more<P>(&self, params: &P) -> Result<LoadMoreOutcome, ListError>
    where
        P: Serialize + ?Sized,
    {
        let (next, base, generation) = {
            let inner = self.lock();
            let Some(next) = inner.next_page_url.clone() else {
                return Ok(LoadMoreOutcome::Exhausted);
            };
            (
                next,
                inner.base_url.clone(),
                self.fetch_sequence.load(Ordering::SeqCst),
            )
        };

        let result = match resolve_page_url(base.as_ref(), &next) {
            Ok(url) => self.get_page(url, params).await,
            Err(err) => Err(err),
        };

        let mut inner = self.lock();
        if self.fetch_sequence.load(Ordering::SeqCst) != generation {
            debug!(%next, "dropping page loaded for a replaced collection");
            return result.map(|_| LoadMoreOutcome::Superseded);
        }

        let page = match result {
            Ok(page) => page,
            Err(err) => {
                warn!(%next, error = %err, "load more failed");
                inner.load_more_error = Some(err.to_string());
                return Err(err);
            }
        };

        let before = inner.items.len();
        for record in page.data {
            if !contains_id(&inner.items, &record.id()) {
                inner.items.push(record);
            }
        }
        let added = inner.items.len() - before;
        inner.next_page_url = page.next_page_url;
        inner.current_page = page.current_page;
        inner.load_more_error = None;
        debug!(%next, added, "appended page");
        Ok(LoadMoreOutcome::Appended { added })
    }

    /// Opens the form: `None` to create a record, `Some` to edit that record.
    pub fn open_sheet(&self, record: Option<T>) {
        let mut inner = self.lock();
        inner.errors.clear();
        inner.selected = record;
        inner.is_open = true;
        inner.session += 1;
    }

    pub fn close_sheet(&self) {
        self.lock().close_sheet();
    }

    /// Saves `payload`: PUT `url/{id}` when a record is selected, POST `url`
    /// otherwise.
    ///
    /// A 422 response fills `errors` and keeps the sheet open. Any other
    /// failure is returned and leaves the state untouched.
    pub async fn submit<P>(&self, url: &str, payload: &P) -> Result<SubmitOutcome<T>, ListError>
    where
        P: Serialize + ?Sized,
    {
        let _busy = BusyGuard::acquire(&self.submits_in_flight);
        let (selected_id, session) = {
            let inner = self.lock();
            (inner.selected.as_ref().map(Record::id), inner.session)
        };

        let request = match &selected_id {
            Some(id) => self.http.put(member_url(url, id)?),
            None => self.http.post(Url::parse(url)?),
        };
        let response = accept_json(request).json(payload).send().await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.bytes().await?;
            let Ok(ValidationBody { errors }) = serde_json::from_slice(&body) else {
                return Err(ListError::Status {
                    status: StatusCode::UNPROCESSABLE_ENTITY,
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            };
            let mut inner = self.lock();
            if inner.session == session {
                inner.errors = errors.clone();
            }
            debug!(%url, fields = errors.len(), "submit rejected");
            return Ok(SubmitOutcome::Rejected(errors));
        }

        let record: T = checked(response).await?.json().await?;
        let record_id = record.id();

        let mut inner = self.lock();
        match &selected_id {
            Some(id) => {
                for item in inner.items.iter_mut().filter(|item| item.id() == *id) {
                    *item = record.clone();
                }
            }
            // Already listed means a newer fetch counted it in `total`.
            None if contains_id(&inner.items, &record_id) => {}
            None => {
                inner.items.insert(0, record.clone());
                inner.total += 1;
            }
        }
        if inner.session == session {
            inner.close_sheet();
        }
        debug!(%url, id = %record_id, updated = selected_id.is_some(), "submit saved");
        Ok(SubmitOutcome::Saved(record))
    }

    /// Deletes `url/{id}` once the injected [`Confirm`] agrees.
    pub async fn destroy(&self, url: &str, id: &T::Id) -> Result<DestroyOutcome, ListError> {
        if !self.confirm.confirm(DELETE_PROMPT).await {
            debug!(%url, %id, "delete declined");
            return Ok(DestroyOutcome::Declined);
        }

        let target = member_url(url, id)?;
        let response = accept_json(self.http.delete(target)).send().await?;
        checked(response).await.inspect_err(|err| {
            warn!(%url, %id, error = %err, "delete failed");
        })?;

        let mut inner = self.lock();
        inner.items.retain(|item| item.id() != *id);
        inner.total = inner.total.saturating_sub(1);
        debug!(%url, %id, "deleted");
        Ok(DestroyOutcome::Deleted)
    }

    pub fn snapshot(&self) -> ListState<T> {
        let inner = self.lock();
        ListState {
            items: inner.items.clone(),
            total: inner.total,
            next_page_url: inner.next_page_url.clone(),
            current_page: inner.current_page,
            selected: inner.selected.clone(),
            is_open: inner.is_open,
            errors: inner.errors.clone(),
            is_fetching: self.is_fetching(),
            is_submitting: self.is_submitting(),
            load_more_error: inner.load_more_error.clone(),
        }
    }

    pub fn items(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    pub fn total(&self) -> u64 {
        self.lock().total
    }

    pub fn next_page_url(&self) -> Option<String> {
        self.lock().next_page_url.clone()
    }

    pub fn has_more(&self) -> bool {
        self.lock().next_page_url.is_some()
    }

    pub fn current_page(&self) -> u64 {
        self.lock().current_page
    }

    pub fn selected(&self) -> Option<T> {
        self.lock().selected.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open
    }

    pub fn errors(&self) -> FieldErrors {
        self.lock().errors.clone()
    }

    pub fn load_more_error(&self) -> Option<String> {
        self.lock().load_more_error.clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.fetches_in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn is_submitting(&self) -> bool {
        self.submits_in_flight.load(Ordering::SeqCst) > 0
    }

    async fn get_page<P>(&self, url: Url, params: &P) -> Result<Page<T>, ListError>
    where
        P: Serialize + ?Sized,
    {
        let response = accept_json(self.http.get(url)).query(params).send().await?;
        Ok(checked(response).await?.json().await?)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn accept_json(request: RequestBuilder) -> RequestBuilder {
    request.header(header::ACCEPT, "application/json")
}

async fn checked(response: Response) -> Result<Response, ListError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ListError::Status { status, body })
}

fn contains_id<T: Record>(items: &[T], id: &T::Id) -> bool {
    items.iter().any(|item| item.id() == *id)
}

fn resolve_page_url(base: Option<&Url>, next: &str) -> Result<Url, ListError> {
    match base {
        Some(base) => Ok(base.join(next)?),
        None => Ok(Url::parse(next)?),
    }
}

/// `url` with `id` appended as one percent-encoded path segment.
fn member_url(url: &str, id: &impl std::fmt::Display) -> Result<Url, ListError> {
    let mut target = Url::parse(url)?;
    target
        .path_segments_mut()
        .map_err(|_| ListError::CannotBeABase(url.to_string()))?
        .pop_if_empty()
        .push(&id.to_string());
    Ok(target)
}

#[cfg(test)]
#[path = "tests/list_controller_tests.rs"]
mod tests;
