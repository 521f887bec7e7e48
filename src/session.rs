//! Authenticated admin session on the router
//!
//! The web UI needs two POSTs to log in: the first hands out a `preSession`
//! cookie, the second presents it alongside the credentials and gets a
//! `sessionindex` cookie back. `forcelogoff=1` kicks any other admin out.
//! Every state-changing form also needs a CSRF token fetched just before it.

use crate::error::{DeviceError, DeviceResult};
use crate::http::Transport;
use crate::models::{Credentials, CsrfResponse};
use serde_json::{Map, Value};
use std::time::Duration;

const LOGIN_PATH: &str = "goform/login";
const CSRF_PATH: &str = "data/getCsrf.asp";

const PRE_SESSION_COOKIE: &str = "preSession";
const SESSION_COOKIE: &str = "sessionindex";

/// POSTs per handshake: one for `preSession`, one to log in with it
const HANDSHAKE_ROUNDS: u32 = 2;
const CSRF_ATTEMPTS: u32 = 2;

pub struct Session {
    transport: Box<dyn Transport>,
    credentials: Credentials,
    retry: u32,
    login_timeout: Duration,
    logged_in: bool,
    session_index: Option<String>,
    pre_session: Option<String>,
}

impl Session {
    pub fn new(
        transport: Box<dyn Transport>,
        credentials: Credentials,
        retry: u32,
        login_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            credentials,
            retry,
            login_timeout,
            logged_in: false,
            session_index: None,
            pre_session: None,
        }
    }

    pub fn logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn session_index(&self) -> Option<&str> {
        self.session_index.as_deref()
    }

    /// `preSession` from the last login reply, else whatever the jar holds
    pub fn pre_session(&self) -> Option<String> {
        self.pre_session
            .clone()
            .or_else(|| self.transport.cookie(PRE_SESSION_COOKIE))
    }

    /// One two-round login handshake.
    ///
    /// A transport error ends the attempt at once and counts the same as a
    /// reply without a session cookie.
    pub async fn attempt(&mut self) -> DeviceResult<()> {
        for round in 1..=HANDSHAKE_ROUNDS {
            let mut form = vec![
                ("usr", self.credentials.username.clone()),
                ("pwd", self.credentials.password.clone()),
                ("forcelogoff", "1".to_string()),
            ];
            if let Some(pre_session) = self.pre_session() {
                form.push(("preSession", pre_session));
            }

            let reply = match self
                .transport
                .post_form(LOGIN_PATH, &form, Some(self.login_timeout))
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::debug!("Login round {} failed: {}", round, e);
                    self.logged_in = false;
                    return Err(e);
                }
            };

            if let Some(pre_session) = reply.cookie(PRE_SESSION_COOKIE) {
                self.pre_session = Some(pre_session.to_string());
            }
            if let Some(index) = reply.cookie(SESSION_COOKIE) {
                tracing::debug!("Session established on round {}", round);
                self.session_index = Some(index.to_string());
                self.logged_in = true;
                return Ok(());
            }
            tracing::trace!("No session cookie after round {}", round);
        }

        self.logged_in = false;
        Err(DeviceError::Auth)
    }

    /// Log in, retrying the whole handshake up to the configured budget
    pub async fn connect(&mut self) -> DeviceResult<()> {
        let budget = self.retry.max(1);
        let mut last_err = DeviceError::Auth;

        for attempt in 1..=budget {
            match self.attempt().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!("Login attempt {}/{} failed: {}", attempt, budget, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Fresh CSRF token. An empty or unparseable payload means the router
    /// forgot the session, so log in again before the second try.
    pub async fn csrf(&mut self) -> DeviceResult<String> {
        let mut last_err = None;

        for attempt in 1..=CSRF_ATTEMPTS {
            let reply = match self.transport.get_json(CSRF_PATH).await {
                Ok(value) => serde_json::from_value::<CsrfResponse>(value)
                    .ok()
                    .and_then(|r| r.csrf_token)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| DeviceError::protocol(CSRF_PATH, "no Csrf_token in reply")),
                Err(e) => Err(e),
            };

            match reply {
                Ok(token) => return Ok(token),
                Err(e @ DeviceError::Protocol { .. }) => {
                    tracing::warn!(
                        "Unusable CSRF payload (attempt {}/{}): {}, logging in again",
                        attempt,
                        CSRF_ATTEMPTS,
                        e
                    );
                    last_err = Some(e);
                    if let Err(e) = self.connect().await {
                        tracing::debug!("Re-login for CSRF failed: {}", e);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "CSRF request failed (attempt {}/{}): {}",
                        attempt,
                        CSRF_ATTEMPTS,
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DeviceError::protocol(CSRF_PATH, "no token")))
    }

    /// Submit a `model` form signed with `token`
    pub async fn submit(&self, path: &str, model: &str, token: String) -> DeviceResult<()> {
        let form = [
            ("model", model.to_string()),
            ("CsrfToken", token),
            ("CsrfTokenFlag", "1".to_string()),
        ];
        self.transport.post_form(path, &form, None).await?;
        Ok(())
    }

    /// Fetch a fresh token and submit a `model` form with it
    pub async fn post_signed(&mut self, path: &str, model: &str) -> DeviceResult<()> {
        let token = self.csrf().await?;
        self.submit(path, model, token).await
    }

    /// First element of a data endpoint's JSON array, `None` if the array is empty
    pub async fn fetch_first(&self, path: &str) -> DeviceResult<Option<Map<String, Value>>> {
        match self.transport.get_json(path).await? {
            Value::Array(items) => match items.into_iter().next() {
                None => Ok(None),
                Some(Value::Object(record)) => Ok(Some(record)),
                Some(other) => Err(DeviceError::protocol(
                    path,
                    format!("expected an object, got {}", other),
                )),
            },
            other => Err(DeviceError::protocol(
                path,
                format!("expected an array, got {}", other),
            )),
        }
    }

    /// First element of a data endpoint's JSON array, which must be present
    pub async fn fetch_record(&self, path: &str) -> DeviceResult<Map<String, Value>> {
        self.fetch_first(path)
            .await?
            .ok_or_else(|| DeviceError::protocol(path, "empty array"))
    }
}
