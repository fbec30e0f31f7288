use std::time::Duration;

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
    /// Response headers (lowercased header names). Multiple values are joined with ", ".
    pub headers: Vec<(String, String)>,
    /// Time from sending the request until the full body was read.
    pub elapsed: Duration,
}

impl HttpResponse {
    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// Request description. Headers and body are passed through untouched.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(http::Method::POST, url).with_body(body)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets an `application/x-www-form-urlencoded` body. The content type is
    /// only added when the caller did not set one.
    #[must_use]
    pub fn with_form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut encoder = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in fields {
            encoder.append_pair(k.as_ref(), v.as_ref());
        }
        self.body = Bytes::from(encoder.finish());
        if !super::util::has_header(&self.headers, "content-type") {
            self.headers.push((
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ));
        }
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_body_is_urlencoded() {
        let req = HttpRequest::new(http::Method::POST, "http://localhost/login")
            .with_form([("username", "user 1"), ("password", "p&ss")]);
        assert_eq!(req.body.as_ref(), b"username=user+1&password=p%26ss");
        assert_eq!(
            req.headers,
            vec![(
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string()
            )]
        );
    }

    #[test]
    fn explicit_content_type_is_kept() {
        let req = HttpRequest::get("http://localhost/")
            .with_header("Content-Type", "text/plain")
            .with_form([("a", "b")]);
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.headers[0].1, "text/plain");
    }

    #[test]
    fn response_header_lookup_is_case_insensitive() {
        let res = HttpResponse {
            status: 503,
            body: Bytes::from_static(b"{}"),
            headers: vec![("content-type".into(), "application/json".into())],
            elapsed: Duration::from_millis(1),
        };
        assert_eq!(res.header("Content-Type"), Some("application/json"));
        assert!(res.is_server_error());
        assert_eq!(res.body_utf8(), Some("{}"));
    }
}
