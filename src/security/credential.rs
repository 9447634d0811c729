use axum::http::HeaderMap;
use std::collections::HashMap;

pub const ACCESS_TOKEN_PARAM: &str = "access_token";
pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// Bearer credential pulled from the query string or the Authorization header.
/// An empty value means the caller supplied none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Short prefix for log lines.
    pub fn masked(&self) -> String {
        let prefix: String = self.0.chars().take(6).collect();
        if prefix.is_empty() {
            "<none>".to_string()
        } else {
            format!("{prefix}***")
        }
    }
}

fn is_blank(s: Option<&str>) -> bool {
    s.map(|v| v.trim().is_empty()).unwrap_or(true)
}

/// `access_token` wins unless it is blank and the header is not. The header
/// only yields a token when it contains the lowercase marker `bearer`; the
/// token is then the second space-separated field.
pub fn extract(headers: &HeaderMap, query: &HashMap<String, String>) -> Credential {
    let access_token = query.get(ACCESS_TOKEN_PARAM).map(String::as_str);
    let header = headers
        .get(HEADER_AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if !is_blank(header) && is_blank(access_token) {
        let header = header.unwrap_or_default();
        let token = if header.contains("bearer") {
            header.split(' ').nth(1).unwrap_or_default()
        } else {
            ""
        };
        return Credential::new(token);
    }

    Credential::new(access_token.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(a) = auth {
            h.insert(HEADER_AUTHORIZATION, HeaderValue::from_str(a).unwrap());
        }
        h
    }

    fn query(token: Option<&str>) -> HashMap<String, String> {
        token
            .map(|t| HashMap::from([(ACCESS_TOKEN_PARAM.to_string(), t.to_string())]))
            .unwrap_or_default()
    }

    #[test]
    fn header_token_used_when_query_blank() {
        let c = extract(&headers(Some("bearer abc123")), &query(None));
        assert_eq!(c.as_str(), "abc123");

        let c = extract(&headers(Some("bearer abc123")), &query(Some("  ")));
        assert_eq!(c.as_str(), "abc123");
    }

    #[test]
    fn query_param_takes_precedence() {
        let c = extract(&headers(Some("bearer from-header")), &query(Some("from-query")));
        assert_eq!(c.as_str(), "from-query");
    }

    #[test]
    fn marker_is_case_sensitive() {
        let c = extract(&headers(Some("Bearer abc123")), &query(None));
        assert!(c.is_empty());
    }

    #[test]
    fn header_without_second_field_yields_empty() {
        let c = extract(&headers(Some("bearer")), &query(None));
        assert!(c.is_empty());
    }

    #[test]
    fn nothing_supplied() {
        let c = extract(&headers(None), &query(None));
        assert!(c.is_empty());
        assert_eq!(c.masked(), "<none>");
    }

    #[test]
    fn masked_keeps_prefix_only() {
        assert_eq!(Credential::new("abcdefghijkl").masked(), "abcdef***");
    }
}
