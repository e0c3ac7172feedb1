//! Personal Markdown note-taking: a SQLite-backed page store, signed session
//! cookies, a sanitizing Markdown renderer, and an axum web front end.

pub mod auth;
pub mod error;
pub mod markdown;
pub mod sanitize;
pub mod search;
pub mod store;
pub mod web;

pub use error::{QuillpadError, Result};
pub use markdown::{Heading, anchor_id, extract_headings, render_page_html};
pub use search::{SearchResult, search};
pub use store::{Page, Store, User};
