//! Storefront admin backend.
//!
//! Serves the product FAQ accordion and revenue statistics that stay in
//! step with the `payments` and `orders` collections of the data store.

pub mod api;
pub mod config;
pub mod errors;
pub mod faq;
pub mod records;
pub mod revenue;
pub mod store;
pub mod watcher;
