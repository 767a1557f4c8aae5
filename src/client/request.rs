use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::Serialize;

use crate::error::ApiError;

/// An outgoing API call, kept in replayable form.
///
/// The pipeline rebuilds the HTTP request from this on every attempt, so a
/// request queued behind a token refresh can be sent again with the new
/// credential.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    headers: HeaderMap,
    retry: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            retry: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body
    ///
    /// # Errors
    /// Returns error if `body` cannot be serialized
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("body is not serializable: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Extra header. An `Authorization` header set here is replaced by the
    /// session credential whenever one is stored.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// True once the request has been through a token refresh
    pub fn is_retry(&self) -> bool {
        self.retry
    }

    pub(crate) fn mark_retry(&mut self) {
        self.retry = true;
    }

    pub(crate) fn build(
        &self,
        http: &reqwest::Client,
        base_url: &str,
        access_token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut headers = self.headers.clone();
        if let Some(token) = access_token {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => tracing::warn!("Access token is not a valid header value, sending without it"),
            }
        }

        let mut builder = http
            .request(self.method.clone(), endpoint(base_url, &self.path))
            .headers(headers);
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        if let Some(body) = &self.body {
            builder = builder.json(body);
        }
        builder
    }
}

/// Join the API base URL and an endpoint path
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            endpoint("http://localhost:8000/api/", "/novels/"),
            "http://localhost:8000/api/novels/"
        );
        assert_eq!(
            endpoint("http://localhost:8000/api", "novels/3/"),
            "http://localhost:8000/api/novels/3/"
        );
        assert_eq!(
            endpoint("http://localhost:8000/api", "https://cdn.example.com/a.png"),
            "https://cdn.example.com/a.png"
        );
    }

    #[test]
    fn test_attach_bearer_credential() {
        let http = reqwest::Client::new();
        let request = ApiRequest::get("/bookshelf/")
            .query("page", "2")
            .build(&http, "http://localhost/api", Some("a.b.c"))
            .build()
            .unwrap();

        assert_eq!(request.url().as_str(), "http://localhost/api/bookshelf/?page=2");
        assert_eq!(request.headers().get(AUTHORIZATION).unwrap(), "Bearer a.b.c");
    }

    #[test]
    fn test_missing_credential_is_not_an_error() {
        let http = reqwest::Client::new();
        let request = ApiRequest::get("/novels/")
            .build(&http, "http://localhost/api", None)
            .build()
            .unwrap();

        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_session_credential_replaces_explicit_authorization() {
        let http = reqwest::Client::new();
        let request = ApiRequest::post("/chapters/")
            .header(AUTHORIZATION, HeaderValue::from_static("Bearer old"))
            .json(&serde_json::json!({ "title": "One" }))
            .unwrap()
            .build(&http, "http://localhost/api", Some("new"))
            .build()
            .unwrap();

        let values: Vec<_> = request.headers().get_all(AUTHORIZATION).iter().collect();
        assert_eq!(values, vec!["Bearer new"]);
        assert!(request.body().is_some());
    }

    #[test]
    fn test_retry_mark() {
        let mut request = ApiRequest::delete("/comments/9/");
        assert!(!request.is_retry());
        request.mark_retry();
        assert!(request.is_retry());
        assert_eq!(request.method(), Method::DELETE);
    }
}
