//! Signed session cookies.
//!
//! The cookie value is `<session-id>.<hex hmac-sha256(session-id)>`. A value
//! whose signature does not verify is treated as absent.

use std::time::Duration;

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Cookie settings.
#[derive(Clone)]
pub struct CookieSettings {
    /// Cookie name.
    pub name: String,
    /// HMAC key.
    pub secret: Vec<u8>,
    /// `Max-Age` of issued cookies.
    pub max_age: Duration,
    /// Add the `Secure` attribute.
    pub secure: bool,
}

impl std::fmt::Debug for CookieSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSettings")
            .field("name", &self.name)
            .field("secret", &"[REDACTED]")
            .field("max_age", &self.max_age)
            .field("secure", &self.secure)
            .finish()
    }
}

/// Issues and reads session cookies.
#[derive(Debug, Clone)]
pub struct SessionCookies {
    settings: CookieSettings,
}

impl SessionCookies {
    /// Cookies signed with `settings.secret`.
    pub fn new(settings: CookieSettings) -> Self {
        Self { settings }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        match HmacSha256::new_from_slice(&self.settings.secret) {
            Ok(mac) => mac,
            Err(_) => unreachable!("hmac key length is unrestricted"),
        }
    }

    /// Token for `session_id`.
    pub fn sign(&self, session_id: &str) -> String {
        let mut mac = self.mac();
        mac.update(session_id.as_bytes());
        format!(
            "{session_id}.{}",
            hex::encode(mac.finalize().into_bytes())
        )
    }

    /// Session id inside `token` if its signature verifies.
    pub fn verify(&self, token: &str) -> Option<String> {
        let (id, signature) = token.rsplit_once('.')?;
        if id.is_empty() {
            return None;
        }
        let signature = hex::decode(signature).ok()?;
        let mut mac = self.mac();
        mac.update(id.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(id.to_string())
    }

    /// The verified session id carried by the request's cookies, if any.
    pub fn session_from(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .filter(|(name, _)| *name == self.settings.name)
            .find_map(|(_, value)| self.verify(value))
    }

    /// `Set-Cookie` value issuing `session_id`.
    pub fn issue(&self, session_id: &str) -> String {
        self.header_value(&self.sign(session_id), self.settings.max_age.as_secs())
    }

    /// `Set-Cookie` value deleting the cookie.
    pub fn expire(&self) -> String {
        self.header_value("", 0)
    }

    fn header_value(&self, value: &str, max_age: u64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.settings.name, value, max_age
        );
        if self.settings.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}
