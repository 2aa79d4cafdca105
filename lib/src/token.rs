/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::{collections::HashMap, future::Future, time::Duration};

use tokio::{sync::Mutex, time::Instant};

use crate::error::{Error, Result};

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Cache of provider access tokens. The map lock is held while a token
/// is fetched, so concurrent callers wait for one fetch instead of
/// issuing their own.
#[derive(Default)]
pub struct AccessTokenCache {
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl AccessTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token for `key`, or fetch and cache a new one.
    /// `fetch` returns the token and its lifetime.
    pub async fn get_token<F, Fut>(&self, key: &str, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Duration)>>,
    {
        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(key) {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }

        let (token, ttl) = fetch()
            .await
            .map_err(|e| Error::FetchToken(key.to_string(), Box::new(e)))?;
        log::debug!("fetched access token for {key}, valid for {ttl:?}");
        tokens.insert(
            key.to_string(),
            CachedToken {
                token: token.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(token)
    }

    pub async fn invalidate_token(&self, key: &str) {
        self.tokens.lock().await.remove(key);
    }
}
