use url::Url;

/// Per-request values the use case needs beyond its arguments: the visitor's
/// OAuth token for GitHub calls and the origin used to build absolute links.
///
/// Cloned into detached notification tasks, so it must not carry anything tied
/// to the lifetime of the HTTP request.
#[derive(Clone)]
pub struct RequestScope {
    pub token: Option<String>,
    pub origin: Url,
}

impl RequestScope {
    pub fn new(token: Option<String>, origin: Url) -> Self {
        Self { token, origin }
    }

    /// Absolute URL for `path` on the request origin. A missing leading slash is added.
    pub fn build_url(&self, path: &str) -> Url {
        let mut url = self.origin.clone();
        url.set_path(path);
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("authenticated", &self.token.is_some())
            .field("origin", &self.origin.as_str())
            .finish()
    }
}
