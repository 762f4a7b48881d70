use axum::http::{header, HeaderMap, HeaderValue};

use crate::keygen::KeyGenerator;

/// Identity of the caller for one request
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    /// `Set-Cookie` value when the id was minted for this request
    pub issued: Option<HeaderValue>,
}

/// Reads the session cookie or mints a new opaque id.
///
/// Ids are not signed; whoever presents a cookie is trusted to own it.
#[derive(Debug, Clone)]
pub struct SessionIssuer {
    cookie_name: String,
    keygen: KeyGenerator,
}

impl SessionIssuer {
    pub fn new(cookie_name: impl Into<String>, id_length: usize) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            keygen: KeyGenerator::new(id_length),
        }
    }

    fn from_cookies(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == self.cookie_name && !value.is_empty())
            .map(|(_, value)| value.to_string())
    }

    pub fn assign(&self, headers: &HeaderMap) -> Result<Session, header::InvalidHeaderValue> {
        if let Some(user_id) = self.from_cookies(headers) {
            return Ok(Session {
                user_id,
                issued: None,
            });
        }

        let user_id = self.keygen.generate();
        let cookie = HeaderValue::from_str(&format!("{}={}; Path=/", self.cookie_name, user_id))?;
        tracing::debug!(user_id = %user_id, "issued new session");

        Ok(Session {
            user_id,
            issued: Some(cookie),
        })
    }
}
