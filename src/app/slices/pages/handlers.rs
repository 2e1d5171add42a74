use axum::http::Uri;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::PrivateCookieJar;

use crate::app::session::SessionData;

/// Shell page; the client bundle renders everything else.
pub const HTML_SHELL: &str = concat!(
    "<!DOCTYPE html>\n",
    "<html>\n",
    "<head>\n",
    "  <meta name=viewport content=\"width=device-width\">\n",
    "  <meta name=\"prchecklist version\" content=\"",
    env!("CARGO_PKG_VERSION"),
    "\">\n",
    "  <title>prchecklist</title>\n",
    "</head>\n",
    "<body>\n",
    "  <div id=\"container\">\n",
    "    <div id=\"main\"></div>\n",
    "  </div>\n",
    "  <footer><a href=\"https://github.com/motemen/prchecklist\">prchecklist</a> ",
    env!("CARGO_PKG_VERSION"),
    "</footer>\n",
    "  <script src=\"/js/bundle.js\"></script>\n",
    "</body>\n",
    "</html>\n",
);

pub async fn index() -> Html<&'static str> {
    Html(HTML_SHELL)
}

/// Checklist page. Logged-out visitors are sent through login first so the
/// API calls made by the page are authenticated.
pub async fn checklist_page(jar: PrivateCookieJar, uri: Uri) -> Response {
    if SessionData::load(&jar).user.is_none() {
        let location = format!("/auth?return_to={}", urlencoding::encode(uri.path()));
        return Redirect::to(&location).into_response();
    }
    Html(HTML_SHELL).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_references_bundle_and_version() {
        assert!(HTML_SHELL.contains(r#"<script src="/js/bundle.js"></script>"#));
        assert!(HTML_SHELL.contains(env!("CARGO_PKG_VERSION")));
    }
}
