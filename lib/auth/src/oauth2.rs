//! OAuth2 client descriptor and per-host redirect resolution.

use std::borrow::Cow;
use std::fmt;
use url::Url;

/// Path the identity provider redirects back to after authorization.
pub const CALLBACK_PATH: &str = "/callback";

/// The OAuth2 client registration used for the browser flow.
///
/// The redirect URL must match what the identity provider is given at
/// authorization time, so a gateway reachable under several hostnames
/// forks a descriptor per host with [`OAuth2Client::for_request`].
#[derive(Clone, PartialEq, Eq)]
pub struct OAuth2Client {
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    redirect_url: Url,
    authorization_endpoint: Url,
    token_endpoint: Option<Url>,
}

impl fmt::Debug for OAuth2Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Client")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("redirect_url", &self.redirect_url.as_str())
            .field("authorization_endpoint", &self.authorization_endpoint.as_str())
            .field("token_endpoint", &self.token_endpoint.as_ref().map(Url::as_str))
            .finish()
    }
}

impl OAuth2Client {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(
        client_id: String,
        client_secret: String,
        scopes: Vec<String>,
        redirect_url: Url,
        authorization_endpoint: Url,
        token_endpoint: Option<Url>,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            scopes,
            redirect_url,
            authorization_endpoint,
            token_endpoint,
        }
    }

    /// Returns the descriptor to use for a request arriving at `request_url`.
    ///
    /// The default is returned borrowed when there is no request URL or the
    /// default redirect already lives under the request's scheme and host.
    /// Otherwise an owned copy is returned whose redirect is the request's
    /// own `{scheme}://{host}/callback`.
    #[must_use]
    pub fn for_request(&self, request_url: Option<&Url>) -> Cow<'_, Self> {
        let Some(request_url) = request_url else {
            return Cow::Borrowed(self);
        };

        let (Ok(root), Ok(callback)) = (request_url.join("/"), request_url.join(CALLBACK_PATH))
        else {
            return Cow::Borrowed(self);
        };

        if self.redirect_url.as_str().starts_with(root.as_str()) {
            return Cow::Borrowed(self);
        }

        Cow::Owned(Self {
            redirect_url: callback,
            ..self.clone()
        })
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn redirect_url(&self) -> &Url {
        &self.redirect_url
    }

    #[must_use]
    pub fn authorization_endpoint(&self) -> &Url {
        &self.authorization_endpoint
    }

    #[must_use]
    pub fn token_endpoint(&self) -> Option<&Url> {
        self.token_endpoint.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid url")
    }

    fn default_client() -> OAuth2Client {
        OAuth2Client::new(
            "admin".to_string(),
            "s3cret".to_string(),
            vec!["openid".to_string()],
            url("https://a.example/callback"),
            url("https://idp.example/authorize"),
            Some(url("https://idp.example/token")),
        )
    }

    #[test]
    fn no_request_url_returns_default() {
        let client = default_client();
        assert!(matches!(client.for_request(None), Cow::Borrowed(_)));
    }

    #[test]
    fn same_host_returns_default_unchanged() {
        let client = default_client();
        let request = url("https://a.example/login?redirect_url=/console");

        let resolved = client.for_request(Some(&request));
        assert!(matches!(resolved, Cow::Borrowed(_)));
        assert_eq!(resolved.redirect_url().as_str(), "https://a.example/callback");
    }

    #[test]
    fn other_host_gets_its_own_callback() {
        let client = default_client();
        let request = url("https://b.example/login");

        let resolved = client.for_request(Some(&request));
        assert!(matches!(resolved, Cow::Owned(_)));
        assert_eq!(resolved.redirect_url().as_str(), "https://b.example/callback");
        assert_eq!(resolved.client_id(), "admin");
        assert_eq!(resolved.client_secret(), "s3cret");
        assert_eq!(resolved.scopes(), client.scopes());
        assert_eq!(resolved.token_endpoint(), client.token_endpoint());
    }

    #[test]
    fn scheme_and_port_are_part_of_the_host_match() {
        let client = default_client();

        let plain = client.for_request(Some(&url("http://a.example/login")));
        assert_eq!(plain.redirect_url().as_str(), "http://a.example/callback");

        let ported = client.for_request(Some(&url("https://a.example:8443/login")));
        assert_eq!(ported.redirect_url().as_str(), "https://a.example:8443/callback");
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", default_client());
        assert!(!rendered.contains("s3cret"));
    }
}
