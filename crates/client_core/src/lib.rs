//! Client-side state for paginated CRUD lists bound to a resource endpoint.

pub mod confirm;
pub mod error;
mod list_controller;
pub mod types;

pub use confirm::{AlwaysConfirm, Confirm, ConfirmFn, NeverConfirm};
pub use error::ListError;
pub use list_controller::{ListController, DELETE_PROMPT, NO_PARAMS};
pub use types::{DestroyOutcome, FetchOutcome, ListState, LoadMoreOutcome, Record, SubmitOutcome};
