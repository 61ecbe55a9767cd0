//! Credential source double.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use xmppsec_core::{CredentialSource, Jid, NegotiationResult, Secret};

/// Hands out a fixed sequence of answers and records every call.
///
/// `None` in the sequence is an abort. Once the sequence is used up every
/// further call aborts too.
#[derive(Debug, Default)]
pub struct RecordingCredentialSource {
    answers: Mutex<VecDeque<Option<Secret>>>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl RecordingCredentialSource {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<Secret>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(|a| a.map(Into::into)).collect()),
            calls: Mutex::default(),
        }
    }

    /// Always answers with `password`.
    pub fn always(password: &str) -> Self {
        Self::new(std::iter::repeat(Some(password)).take(64))
    }

    /// `(jid, attempt)` of every call, in order.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Attempt numbers of every call, in order.
    pub fn attempts(&self) -> Vec<u32> {
        self.calls().into_iter().map(|(_, attempt)| attempt).collect()
    }
}

#[async_trait]
impl CredentialSource for RecordingCredentialSource {
    async fn password(&self, jid: &Jid, attempt: u32) -> NegotiationResult<Option<Secret>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((jid.to_string(), attempt));
        }
        let answer = self
            .answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .flatten();
        Ok(answer)
    }
}
