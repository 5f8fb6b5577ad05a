use std::sync::Mutex;
use std::time::Duration;

use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ResponseFuture};

#[derive(Debug, Clone)]
enum Reply {
    Status(u16, String),
    TransportError,
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    delay: Option<Duration>,
    reply: Reply,
}

/// Transport double: the first rule whose pattern occurs in the URL answers.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    rules: Mutex<Vec<Rule>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, status: u16, body: &str) {
        self.push(pattern, None, Reply::Status(status, body.to_owned()));
    }

    pub fn respond_after(&self, pattern: &str, delay: Duration, status: u16, body: &str) {
        self.push(pattern, Some(delay), Reply::Status(status, body.to_owned()));
    }

    pub fn fail_transport(&self, pattern: &str) {
        self.push(pattern, None, Reply::TransportError);
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().expect("seen").len()
    }

    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.seen
            .lock()
            .expect("seen")
            .iter()
            .filter(|url| url.contains(pattern))
            .count()
    }

    /// Requested URLs in call order.
    pub fn urls(&self) -> Vec<String> {
        self.seen.lock().expect("seen").clone()
    }

    fn push(&self, pattern: &str, delay: Option<Duration>, reply: Reply) {
        self.rules.lock().expect("rules").push(Rule {
            pattern: pattern.to_owned(),
            delay,
            reply,
        });
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute(&self, request: HttpRequest) -> ResponseFuture<'_> {
        self.seen.lock().expect("seen").push(request.url.clone());
        let matched = self
            .rules
            .lock()
            .expect("rules")
            .iter()
            .find(|rule| request.url.contains(&rule.pattern))
            .map(|rule| (rule.delay, rule.reply.clone()));

        Box::pin(async move {
            let Some((delay, reply)) = matched else {
                return Err(HttpError::non_retryable(format!(
                    "no scripted response for {}",
                    request.url
                )));
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match reply {
                Reply::Status(status, body) => Ok(HttpResponse::new(status, body)),
                Reply::TransportError => Err(HttpError::transient("connection reset")),
            }
        })
    }
}
