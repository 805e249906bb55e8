//! The two request trust modes.
//!
//! Interactive users arrive through a reverse proxy that has already
//! authenticated them and sets an identity header. Scripts present the shared
//! bearer token instead. Token-issuing endpoints accept only the proxy mode,
//! so a leaked token cannot be used to read or rotate itself.

use anyhow::{Context, Result, bail};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName};
use libwsctl::TokenAuthority;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    ProxyOnly,
    BearerOrProxy,
}

pub struct Authorizer {
    proxy_headers: Vec<HeaderName>,
    tokens: TokenAuthority,
}

impl Authorizer {
    pub fn new(proxy_headers: &[String], tokens: TokenAuthority) -> Result<Self> {
        if proxy_headers.is_empty() {
            bail!("at least one proxy identity header is required");
        }
        let proxy_headers = proxy_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes())
                    .with_context(|| format!("invalid proxy header name: {name}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            proxy_headers,
            tokens,
        })
    }

    pub fn tokens(&self) -> &TokenAuthority {
        &self.tokens
    }

    /// Identity set by the trusted proxy, if any.
    pub fn proxy_user<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        self.proxy_headers.iter().find_map(|name| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
    }

    pub fn authorize(&self, headers: &HeaderMap, mode: AuthMode) -> bool {
        if self.proxy_user(headers).is_some() {
            return true;
        }
        match mode {
            AuthMode::ProxyOnly => false,
            AuthMode::BearerOrProxy => {
                bearer_token(headers).is_some_and(|token| self.tokens.verify(token))
            }
        }
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
