//! HTTP client abstraction.
//!
//! The engine issues JSON POSTs with bearer tokens and nothing else, so
//! the surface is one method. Implement it over whatever HTTP library
//! the host uses; the testkit ships a scripted implementation.

/// A plain HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Creates a 200 response.
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// Creates a response with a status code.
    #[must_use]
    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues HTTP requests for the sync engine.
pub trait HttpClient: Send + Sync {
    /// Sends a JSON POST, optionally with a bearer token.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error message when the request could
    /// not complete; HTTP error statuses come back as responses.
    fn post_json(
        &self,
        url: &str,
        body: &str,
        bearer_token: Option<&str>,
    ) -> Result<HttpResponse, String>;
}
