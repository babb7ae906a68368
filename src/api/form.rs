//! Form-field extraction for the POST endpoints.
//!
//! The dashboard posts `FormData` (multipart); scripts tend to post
//! urlencoded bodies or JSON. All three collapse into one field map.

use std::collections::HashMap;
use std::str::FromStr;

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::{Form, Json};

use super::response::ApiError;
use crate::error::AnalysisError;

#[derive(Debug, Default, Clone)]
pub struct FormFields(pub HashMap<String, String>);

impl<S> FromRequest<S> for FormFields
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::failure(e.body_text()))?;
            let mut fields = HashMap::new();
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| ApiError::failure(e.body_text()))?
            {
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::failure(e.body_text()))?;
                fields.insert(name, value);
            }
            return Ok(Self(fields));
        }

        if content_type.starts_with("application/json") {
            let Json(body) = Json::<HashMap<String, serde_json::Value>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::failure(e.body_text()))?;
            let fields = body
                .into_iter()
                .filter_map(|(k, v)| match v {
                    serde_json::Value::String(s) => Some((k, s)),
                    serde_json::Value::Null => None,
                    other => Some((k, other.to_string())),
                })
                .collect();
            return Ok(Self(fields));
        }

        let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
            .await
            .map_err(|e| ApiError::failure(e.body_text()))?;
        Ok(Self(fields))
    }
}

impl FormFields {
    /// Trimmed value of `name`, treating blank as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    /// First present field among `names`.
    pub fn first_of(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|n| self.get(n))
    }

    pub fn required(&self, name: &str) -> Result<&str, AnalysisError> {
        self.get(name)
            .ok_or_else(|| AnalysisError::invalid(format!("missing form field '{name}'")))
    }

    /// Parse `name`, falling back to `default` when it is absent.
    pub fn parse_or<T: FromStr>(&self, name: &str, default: T) -> Result<T, AnalysisError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| AnalysisError::invalid(format!("field '{name}' has invalid value '{raw}'"))),
        }
    }
}

impl From<HashMap<String, String>> for FormFields {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn fields(pairs: &[(&str, &str)]) -> FormFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>()
            .into()
    }

    #[test]
    fn test_blank_is_absent() {
        let f = fields(&[("node", "  "), ("node_name", "db01")]);
        assert_eq!(f.get("node"), None);
        assert_eq!(f.first_of(&["node", "node_name"]), Some("db01"));
        assert!(f.required("node").is_err());
    }

    #[test]
    fn test_parse_or() {
        let f = fields(&[("window", "20"), ("k", "abc")]);
        assert_eq!(f.parse_or("window", 120usize).unwrap(), 20);
        assert_eq!(f.parse_or("missing", 3.0f64).unwrap(), 3.0);
        assert!(matches!(
            f.parse_or("k", 3.0f64),
            Err(AnalysisError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_extracts_urlencoded() {
        let req = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("node=app1&window=10"))
            .unwrap();
        let f = FormFields::from_request(req, &()).await.unwrap();
        assert_eq!(f.get("node"), Some("app1"));
        assert_eq!(f.get("window"), Some("10"));
    }

    #[tokio::test]
    async fn test_extracts_multipart() {
        let body = "--XYZ\r\n\
Content-Disposition: form-data; name=\"node\"\r\n\r\n\
app1\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"k\"\r\n\r\n\
2.5\r\n\
--XYZ--\r\n";
        let req = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "multipart/form-data; boundary=XYZ")
            .body(Body::from(body))
            .unwrap();
        let f = FormFields::from_request(req, &()).await.unwrap();
        assert_eq!(f.get("node"), Some("app1"));
        assert_eq!(f.parse_or("k", 0.0f64).unwrap(), 2.5);
    }

    #[tokio::test]
    async fn test_extracts_json_numbers_as_text() {
        let req = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"node":"app1","window":15,"relatedci":null}"#))
            .unwrap();
        let f = FormFields::from_request(req, &()).await.unwrap();
        assert_eq!(f.get("window"), Some("15"));
        assert_eq!(f.get("relatedci"), None);
    }
}
