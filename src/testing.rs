//! Scripted in-memory router for tests

use crate::error::{DeviceError, DeviceResult};
use crate::http::{FormReply, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the router answers one POST to `goform/login`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Login {
    /// Issues a session cookie
    Accept,
    /// Issues only a `preSession` cookie
    PreSessionOnly,
    /// Issues a `preSession` cookie scoped so the jar never hands it back
    PreSessionReplyOnly,
    /// Answers without any cookie
    Refuse,
    /// Connection refused
    Unreachable,
}

#[derive(Default)]
struct State {
    logins: VecDeque<Login>,
    responses: HashMap<String, VecDeque<DeviceResult<Value>>>,
    posts: Vec<(String, HashMap<String, String>)>,
    gets: HashMap<String, u32>,
    cookies: HashMap<String, String>,
    issued: u32,
}

/// Cheap to clone; clones share the same scripted state
#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<State>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue login answers; once drained every login is accepted
    pub fn script_logins(&self, logins: impl IntoIterator<Item = Login>) {
        self.state.lock().unwrap().logins.extend(logins);
    }

    /// Queue a reply for `path`; the last reply queued repeats forever
    pub fn respond(&self, path: &str, value: Value) {
        self.push(path, Ok(value));
    }

    /// Drop every reply queued for `path`
    pub fn clear(&self, path: &str) {
        self.state.lock().unwrap().responses.remove(path);
    }

    /// Queue a transport failure for `path`
    pub fn fail(&self, path: &str) {
        self.push(path, Err(DeviceError::Connectivity("connection reset".into())));
    }

    /// Queue a body that is not JSON for `path`
    pub fn garble(&self, path: &str) {
        self.push(path, Err(DeviceError::protocol(path, "EOF while parsing a value")));
    }

    fn push(&self, path: &str, reply: DeviceResult<Value>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn posts_to(&self, path: &str) -> Vec<HashMap<String, String>> {
        self.state
            .lock()
            .unwrap()
            .posts
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, form)| form.clone())
            .collect()
    }

    pub fn gets(&self, path: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .gets
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Paths of every POST, in order
    pub fn post_paths(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .posts
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for FakeDevice {
    async fn get_json(&self, path: &str) -> DeviceResult<Value> {
        let mut state = self.state.lock().unwrap();
        *state.gets.entry(path.to_string()).or_default() += 1;

        let queue = state
            .responses
            .get_mut(path)
            .ok_or_else(|| DeviceError::protocol(path, "404 Not Found"))?;
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(DeviceError::protocol(path, "no reply scripted")))
        }
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
        _timeout: Option<Duration>,
    ) -> DeviceResult<FormReply> {
        let mut state = self.state.lock().unwrap();
        let fields: HashMap<String, String> = form
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        state.posts.push((path.to_string(), fields));

        if path != "goform/login" {
            return Ok(FormReply::default());
        }

        let login = state.logins.pop_front().unwrap_or(Login::Accept);
        state.issued += 1;
        let (name, value) = match login {
            Login::Unreachable => {
                return Err(DeviceError::Connectivity("connection refused".into()))
            }
            Login::Refuse => return Ok(FormReply::default()),
            Login::PreSessionOnly => ("preSession", format!("pre-{}", state.issued)),
            Login::PreSessionReplyOnly => {
                return Ok(FormReply {
                    cookies: vec![("preSession".into(), format!("pre-{}", state.issued))],
                })
            }
            Login::Accept => ("sessionindex", state.issued.to_string()),
        };

        state.cookies.insert(name.to_string(), value.clone());
        Ok(FormReply {
            cookies: vec![(name.to_string(), value)],
        })
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().cookies.get(name).cloned()
    }
}
