/// Fixed bearer-token table, loaded from `[auth.tokens]`
use super::{Authenticator, bearer_token};
use axum::http::HeaderMap;
use std::collections::HashMap;

pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Option<String> {
        let token = bearer_token(headers)?;
        self.tokens.get(token).cloned()
    }
}
