use std::{fmt, hash::Hash};

use serde::de::DeserializeOwned;
use shared::{
    domain::{User, UserId},
    error::FieldErrors,
};

/// An entity the list controller can hold. Only the id is ever inspected.
pub trait Record: Clone + DeserializeOwned + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync;

    fn id(&self) -> Self::Id;
}

impl Record for User {
    type Id = UserId;

    fn id(&self) -> UserId {
        self.id
    }
}

/// Snapshot of everything a list screen renders.
#[derive(Debug, Clone)]
pub struct ListState<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub next_page_url: Option<String>,
    pub current_page: u64,
    pub selected: Option<T>,
    pub is_open: bool,
    pub errors: FieldErrors,
    pub is_fetching: bool,
    pub is_submitting: bool,
    pub load_more_error: Option<String>,
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            next_page_url: None,
            current_page: 1,
            selected: None,
            is_open: false,
            errors: FieldErrors::new(),
            is_fetching: false,
            is_submitting: false,
            load_more_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    /// A newer fetch was issued while this one was in flight; its response was dropped.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    Appended { added: usize },
    /// There was no next page; nothing was requested.
    Exhausted,
    /// A fetch replaced the collection while the page was loading.
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome<T> {
    Saved(T),
    Rejected(FieldErrors),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    Deleted,
    Declined,
}
