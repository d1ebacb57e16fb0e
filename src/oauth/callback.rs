//! Absolute callback URL construction.

use url::Url;

use super::error::OAuthError;

/// Pages and endpoints the service links back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// `/oauth/{kind}/{service}/callback`, where providers redirect after consent
    FinishAuthorization,
    /// `/apps/{app}`, the page an operator returns to
    ShowApp,
}

pub trait CallbackUrlBuilder: Send + Sync {
    /// Build an absolute URL for `action`.
    ///
    /// Parameters consumed by the route become path segments, the rest are
    /// appended as query parameters.
    fn build_absolute_callback_url(
        &self,
        action: CallbackAction,
        params: &[(&str, &str)],
    ) -> Result<Url, OAuthError>;
}

/// Builds URLs below the configured public base URL
#[derive(Debug, Clone)]
pub struct PublicUrlBuilder {
    base: Url,
}

impl PublicUrlBuilder {
    pub fn new(public_base_url: &str) -> Result<Self, OAuthError> {
        let base = Url::parse(public_base_url)
            .map_err(|e| OAuthError::invalid_endpoint(public_base_url, e))?;
        if base.cannot_be_a_base() {
            return Err(OAuthError::Callback(format!(
                "public base url '{}' cannot carry a path",
                public_base_url
            )));
        }
        Ok(Self { base })
    }
}

fn take<'a>(params: &[(&'a str, &'a str)], name: &str) -> Result<&'a str, OAuthError> {
    params
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| *value)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| OAuthError::Callback(format!("missing '{}' parameter", name)))
}

impl CallbackUrlBuilder for PublicUrlBuilder {
    fn build_absolute_callback_url(
        &self,
        action: CallbackAction,
        params: &[(&str, &str)],
    ) -> Result<Url, OAuthError> {
        let (segments, consumed): (Vec<&str>, &[&str]) = match action {
            CallbackAction::FinishAuthorization => (
                vec![
                    "oauth",
                    take(params, "kind")?,
                    take(params, "service")?,
                    "callback",
                ],
                &["kind", "service"][..],
            ),
            CallbackAction::ShowApp => (vec!["apps", take(params, "app")?], &["app"][..]),
        };

        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| OAuthError::Callback("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);

        let extra: Vec<_> = params
            .iter()
            .filter(|(key, _)| !consumed.contains(key))
            .collect();
        if !extra.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in extra {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }
}
