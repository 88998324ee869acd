//! Query normalization and request keys.
//!
//! A logical query is either a bare path or a path plus search parameters.
//! Both normalize to an absolute path, and the request key is derived from
//! the method and the resolved URL so that every caller asking for the same
//! `METHOD + URL` shares one cache entry and one notification channel.

use http::Method;

/// A logical query handed to the orchestrator.
///
/// # Examples
///
/// ```
/// use observable_request_core::query::Query;
///
/// assert_eq!(Query::from("users").to_path(), "/users");
///
/// let query = Query::from("/users?active=true").with_param("page", "2");
/// assert_eq!(query.to_path(), "/users?active=true&page=2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// A raw path, used as-is apart from the leading slash
    Path(String),
    /// A path plus search parameters, encoded in insertion order
    WithParams {
        /// Path, possibly already containing a query string
        url: String,
        /// Search parameters
        params: Vec<(String, String)>,
    },
}

impl Query {
    /// Create a query with search parameters.
    #[must_use]
    pub fn with_params<K, V>(url: impl Into<String>, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::WithParams {
            url: url.into(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Builder: Append one search parameter
    #[must_use]
    pub fn with_param(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let pair = (key.into(), value.into());
        match self {
            Self::Path(url) => Self::WithParams {
                url,
                params: vec![pair],
            },
            Self::WithParams { url, mut params } => {
                params.push(pair);
                Self::WithParams { url, params }
            },
        }
    }

    /// The path part, before normalization.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Path(url) | Self::WithParams { url, .. } => url,
        }
    }

    /// Normalize to an absolute path with the encoded query string appended.
    ///
    /// Parameters are joined with `&` when the path already carries a `?`,
    /// otherwise with `?`. An empty parameter list appends nothing.
    #[must_use]
    pub fn to_path(&self) -> String {
        match self {
            Self::Path(url) => with_leading_slash(url),
            Self::WithParams { url, params } => {
                let path = with_leading_slash(url);
                if params.is_empty() {
                    return path;
                }
                let divider = if path.contains('?') { '&' } else { '?' };
                format!("{path}{divider}{}", encode_params(params))
            },
        }
    }
}

impl From<&str> for Query {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for Query {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

/// Derive the request key for a resolved URL.
///
/// The key is `METHOD + "/" + url`, so a `GET` of `/users` keys as `GET//users`.
#[must_use]
pub fn request_key(method: &Method, url: &str) -> String {
    format!("{}/{url}", method.as_str())
}

fn with_leading_slash(url: &str) -> String {
    if url.starts_with('/') {
        url.to_string()
    } else {
        format!("/{url}")
    }
}

fn encode_params(params: &[(String, String)]) -> String {
    // Sequences of string pairs cannot fail to serialize
    serde_urlencoded::to_string(params).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn leading_slash_is_enforced() {
        assert_eq!(Query::from("test").to_path(), "/test");
        assert_eq!(Query::from("/test").to_path(), "/test");
        assert_eq!(Query::from("").to_path(), "/");
    }

    #[test]
    fn params_use_question_mark_then_ampersand() {
        let query = Query::with_params("items", [("page", "1"), ("size", "20")]);
        assert_eq!(query.to_path(), "/items?page=1&size=20");

        let query = Query::with_params("/items?sort=asc", [("page", "1")]);
        assert_eq!(query.to_path(), "/items?sort=asc&page=1");
    }

    #[test]
    fn params_are_form_encoded() {
        let query = Query::with_params("search", [("q", "hello world"), ("tag", "a&b")]);
        assert_eq!(query.to_path(), "/search?q=hello+world&tag=a%26b");
    }

    #[test]
    fn empty_params_append_nothing() {
        let query = Query::with_params("items", Vec::<(String, String)>::new());
        assert_eq!(query.to_path(), "/items");
    }

    #[test]
    fn request_key_joins_method_and_url() {
        assert_eq!(request_key(&Method::GET, "/test"), "GET//test");
        assert_eq!(
            request_key(&Method::POST, "https://api.example.com/users"),
            "POST/https://api.example.com/users"
        );
    }

    proptest! {
        #[test]
        fn normalized_path_always_absolute(path in "[a-z/]{0,16}") {
            let normalized = Query::from(path.as_str()).to_path();
            prop_assert!(normalized.starts_with('/'));
            prop_assert!(normalized.ends_with(path.trim_start_matches('/')));
        }

        #[test]
        fn keys_differ_by_method(path in "/[a-z]{1,12}") {
            prop_assert_ne!(request_key(&Method::GET, &path), request_key(&Method::POST, &path));
        }
    }
}
