//! A scripted [`XmlStream`].
//!
//! The stream is given the list of actions the code under test is expected
//! to perform, in order, together with the peer's reply to each. Anything
//! off-script fails with a transport error naming what was expected, and
//! every action performed is logged for later assertions.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use xmppsec_core::{
    Element, NegotiationError, NegotiationResult, QName, SaslChannel, SaslFailure, SaslStep,
    StreamFeatures, TlsHandle, XmlStream, NS_STARTTLS,
};

/// Peer reply to `<starttls/>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTlsReply {
    Proceed,
    Failure,
}

/// Peer reply after a stream reset.
#[derive(Debug, Clone)]
pub enum ResetReply {
    Features(StreamFeatures),
    /// Never answer.
    Hang,
}

/// Peer reply to `auth` or `response`.
#[derive(Debug, Clone)]
pub enum AuthReply {
    Success,
    Challenge(Vec<u8>),
    Failure(SaslFailure),
}

/// One expected action and the peer's reply to it.
#[derive(Debug, Clone)]
pub enum Expect {
    StartTls(StartTlsReply),
    /// TLS upgrade; `Err` carries the handshake error text.
    Upgrade(Result<TlsHandle, String>),
    Reset(ResetReply),
    Auth { mechanism: String, reply: AuthReply },
    Response(AuthReply),
    Abort,
}

impl Expect {
    pub fn auth(mechanism: impl Into<String>, reply: AuthReply) -> Self {
        Self::Auth {
            mechanism: mechanism.into(),
            reply,
        }
    }

    pub fn features(features: StreamFeatures) -> Self {
        Self::Reset(ResetReply::Features(features))
    }

    /// Successful upgrade verified against `server_name`.
    pub fn upgrade(server_name: impl Into<String>) -> Self {
        Self::Upgrade(Ok(TlsHandle::new(server_name)))
    }
}

/// Something the code under test did to the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Sent(Vec<QName>),
    Upgraded { server_name: String },
    Reset { timeout: Duration },
    Initiated { mechanism: String },
    Responded,
    Aborted,
}

/// Stream double driven by a script of [`Expect`] entries.
#[derive(Debug)]
pub struct ScriptedStream {
    script: VecDeque<Expect>,
    actions: Vec<Action>,
    starttls_capable: bool,
}

impl ScriptedStream {
    pub fn new(script: impl IntoIterator<Item = Expect>) -> Self {
        Self {
            script: script.into_iter().collect(),
            actions: Vec::new(),
            starttls_capable: true,
        }
    }

    /// Pretend the transport cannot be upgraded.
    pub fn without_starttls_support(mut self) -> Self {
        self.starttls_capable = false;
        self
    }

    /// Actions performed so far.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Number of stream resets performed so far.
    pub fn resets(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Reset { .. }))
            .count()
    }

    /// Script entries not consumed yet.
    pub fn remaining(&self) -> &VecDeque<Expect> {
        &self.script
    }

    /// Panic unless the whole script was played.
    pub fn assert_finished(&self) {
        assert!(
            self.script.is_empty(),
            "script not finished, still expecting {:?}; actions: {:?}",
            self.script,
            self.actions
        );
    }

    fn next(&mut self, what: &str) -> NegotiationResult<Expect> {
        self.script.pop_front().ok_or_else(|| {
            NegotiationError::Transport(format!("unexpected {}: script is finished", what))
        })
    }

    fn off_script(what: &str, expected: &Expect) -> NegotiationError {
        NegotiationError::Transport(format!("unexpected {}: script expected {:?}", what, expected))
    }

    fn auth_reply(reply: AuthReply) -> NegotiationResult<SaslStep> {
        match reply {
            AuthReply::Success => Ok(SaslStep::Success(None)),
            AuthReply::Challenge(data) => Ok(SaslStep::Challenge(data)),
            AuthReply::Failure(failure) => Err(NegotiationError::Sasl(failure)),
        }
    }
}

#[async_trait]
impl XmlStream for ScriptedStream {
    async fn send_and_wait_for(
        &mut self,
        outbound: Vec<Element>,
        expected: &[QName],
    ) -> NegotiationResult<Element> {
        self.actions
            .push(Action::Sent(outbound.iter().map(|e| e.name.clone()).collect()));

        let step = self.next("send")?;
        let reply = match &step {
            Expect::StartTls(reply)
                if outbound.len() == 1 && outbound[0].is(NS_STARTTLS, "starttls") =>
            {
                *reply
            }
            other => return Err(Self::off_script("send", other)),
        };

        let local = match reply {
            StartTlsReply::Proceed => "proceed",
            StartTlsReply::Failure => "failure",
        };
        let element = Element::new(NS_STARTTLS, local);
        if !expected.contains(&element.name) {
            return Err(NegotiationError::Transport(format!(
                "reply {} is not among the awaited elements",
                element.name
            )));
        }
        Ok(element)
    }

    fn supports_starttls(&self) -> bool {
        self.starttls_capable
    }

    async fn starttls(
        &mut self,
        _config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
    ) -> NegotiationResult<TlsHandle> {
        let server_name = server_name.to_str().into_owned();
        self.actions.push(Action::Upgraded {
            server_name: server_name.clone(),
        });

        match self.next("starttls")? {
            Expect::Upgrade(Ok(mut handle)) => {
                handle.server_name = server_name;
                Ok(handle)
            }
            Expect::Upgrade(Err(reason)) => Err(NegotiationError::Transport(reason)),
            other => Err(Self::off_script("starttls", &other)),
        }
    }

    async fn reset_stream_and_get_features(
        &mut self,
        timeout: Duration,
    ) -> NegotiationResult<StreamFeatures> {
        self.actions.push(Action::Reset { timeout });

        match self.next("reset")? {
            Expect::Reset(ResetReply::Features(features)) => Ok(features),
            Expect::Reset(ResetReply::Hang) => std::future::pending().await,
            other => Err(Self::off_script("reset", &other)),
        }
    }

    fn sasl_channel(&mut self) -> &mut dyn SaslChannel {
        self
    }
}

#[async_trait]
impl SaslChannel for ScriptedStream {
    async fn initiate(
        &mut self,
        mechanism: &str,
        _initial_response: Option<&[u8]>,
    ) -> NegotiationResult<SaslStep> {
        self.actions.push(Action::Initiated {
            mechanism: mechanism.to_string(),
        });

        match self.next("auth")? {
            Expect::Auth {
                mechanism: expected,
                reply,
            } if expected == mechanism => Self::auth_reply(reply),
            other => Err(Self::off_script(&format!("auth with {}", mechanism), &other)),
        }
    }

    async fn respond(&mut self, _payload: &[u8]) -> NegotiationResult<SaslStep> {
        self.actions.push(Action::Responded);

        match self.next("response")? {
            Expect::Response(reply) => Self::auth_reply(reply),
            other => Err(Self::off_script("response", &other)),
        }
    }

    async fn abort(&mut self) -> NegotiationResult<()> {
        self.actions.push(Action::Aborted);

        match self.next("abort")? {
            Expect::Abort => Ok(()),
            other => Err(Self::off_script("abort", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xmppsec_core::{SaslCondition, NS_SASL};

    fn starttls() -> Vec<Element> {
        vec![Element::new(NS_STARTTLS, "starttls")]
    }

    fn replies() -> Vec<QName> {
        vec![
            QName::new(NS_STARTTLS, "proceed"),
            QName::new(NS_STARTTLS, "failure"),
        ]
    }

    #[tokio::test]
    async fn plays_starttls_reply() {
        let mut stream = ScriptedStream::new([Expect::StartTls(StartTlsReply::Failure)]);
        let reply = stream.send_and_wait_for(starttls(), &replies()).await.unwrap();
        assert!(reply.is(NS_STARTTLS, "failure"));
        stream.assert_finished();
    }

    #[tokio::test]
    async fn catches_surplus_send() {
        let mut stream = ScriptedStream::new(Vec::new());
        let err = stream
            .send_and_wait_for(starttls(), &replies())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("script is finished"));
    }

    #[tokio::test]
    async fn catches_out_of_order_action() {
        let mut stream =
            ScriptedStream::new([Expect::features(StreamFeatures::new().with_mechanisms(["PLAIN"]))]);
        let err = stream.initiate("PLAIN", None).await.unwrap_err();
        assert!(err.to_string().contains("unexpected auth with PLAIN"));
        assert_eq!(
            stream.actions(),
            &[Action::Initiated {
                mechanism: "PLAIN".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn catches_wrong_element() {
        let mut stream = ScriptedStream::new([Expect::StartTls(StartTlsReply::Proceed)]);
        let err = stream
            .send_and_wait_for(vec![Element::new(NS_SASL, "auth")], &replies())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::Transport(_)));
    }

    #[tokio::test]
    async fn sasl_failure_is_reported() {
        let mut stream = ScriptedStream::new([Expect::auth(
            "PLAIN",
            AuthReply::Failure(SaslFailure::new(SaslCondition::NotAuthorized)),
        )]);
        let err = stream.initiate("PLAIN", None).await.unwrap_err();
        match err {
            NegotiationError::Sasl(failure) => assert_eq!(failure.condition, "not-authorized"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn hang_never_answers() {
        let mut stream = ScriptedStream::new([Expect::Reset(ResetReply::Hang)]);
        let res = tokio::time::timeout(
            Duration::from_millis(20),
            stream.reset_stream_and_get_features(Duration::from_secs(5)),
        )
        .await;
        assert!(res.is_err());
    }

    #[test]
    #[should_panic(expected = "script not finished")]
    fn unfinished_script_panics() {
        ScriptedStream::new([Expect::Abort]).assert_finished();
    }
}
