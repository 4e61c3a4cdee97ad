//! URL helpers for redirect flows.
//!
//! Parameters may arrive in the query string (`?code=...`) or in the
//! fragment (`#code=...` or hash-routed `#/page?code=...`).

use url::Url;
use url::form_urlencoded;

use crate::error::{SdkError, SdkResult};

/// Value of a query string parameter.
pub fn get_query(href: &str, name: &str) -> Option<String> {
    let url = Url::parse(href).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Value of a parameter carried in the fragment.
pub fn get_hash(href: &str, name: &str) -> Option<String> {
    let url = Url::parse(href).ok()?;
    let fragment = url.fragment()?;
    let params = fragment
        .split_once('?')
        .map(|(_, query)| query)
        .unwrap_or(fragment);
    form_urlencoded::parse(params.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// The authorization code of a redirect return, from query or fragment.
pub fn extract_code(href: &str) -> Option<String> {
    get_query(href, "code")
        .filter(|code| !code.is_empty())
        .or_else(|| get_hash(href, "code"))
        .filter(|code| !code.is_empty())
}

/// Remove a parameter from the query string and from the fragment.
///
/// Unparseable input is returned unchanged.
pub fn remove_param(href: &str, name: &str) -> String {
    let Ok(mut url) = Url::parse(href) else {
        return href.to_string();
    };

    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != name)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    let cleaned = url
        .fragment()
        .and_then(|fragment| strip_fragment_param(fragment, name));
    if let Some(fragment) = cleaned {
        url.set_fragment((!fragment.is_empty()).then_some(fragment.as_str()));
    }

    url.to_string()
}

/// The fragment without `name`, or `None` when it does not carry it.
///
/// Handles both flat (`code=..&state=..`) and hash-routed (`/page?code=..`)
/// fragments.
fn strip_fragment_param(fragment: &str, name: &str) -> Option<String> {
    let (route, params) = match fragment.split_once('?') {
        Some((route, params)) => (Some(route), params),
        None => (None, fragment),
    };
    let pairs: Vec<(String, String)> = form_urlencoded::parse(params.as_bytes())
        .into_owned()
        .collect();
    if !pairs.iter().any(|(key, _)| key == name) {
        return None;
    }

    let kept: Vec<(String, String)> = pairs.into_iter().filter(|(key, _)| key != name).collect();
    let query = if kept.is_empty() {
        String::new()
    } else {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish()
    };
    Some(match route {
        Some(route) if query.is_empty() => route.to_string(),
        Some(route) => format!("{route}?{query}"),
        None => query,
    })
}

/// Parameters of an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeRequest<'a> {
    pub host: &'a str,
    pub appid: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
    pub state: &'a str,
}

impl AuthorizeRequest<'_> {
    /// Build the navigation target. `redirect_uri` is URL-encoded here.
    pub fn to_url(&self) -> SdkResult<String> {
        let mut url = Url::parse(self.host).map_err(|e| {
            SdkError::invalid_params(format!("invalid authorization host {}: {}", self.host, e))
        })?;
        url.query_pairs_mut()
            .append_pair("appid", self.appid)
            .append_pair("redirect_uri", self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", self.scope)
            .append_pair("state", self.state);
        url.set_fragment(Some("wechat_redirect"));
        Ok(url.to_string())
    }
}
