//! # Observable Request HTTP
//!
//! The production [`Fetch`](observable_request_core::Fetch) implementation,
//! backed by [`reqwest`].
//!
//! ## Example
//!
//! ```no_run
//! use observable_request_http::ReqwestFetch;
//! use observable_request_runtime::{ApiRequest, PassThroughAuth};
//! use std::sync::Arc;
//!
//! let transport = ApiRequest::new(Arc::new(ReqwestFetch::new()), Arc::new(PassThroughAuth));
//! ```

pub mod fetch;

pub use fetch::ReqwestFetch;
