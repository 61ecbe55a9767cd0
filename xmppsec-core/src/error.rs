//! Error types and SASL failure conditions for stream security negotiation.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::stream::{Element, NS_SASL};

/// Boxed error used as the underlying cause of a TLS failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// SASL failure conditions as defined in RFC 6120, Section 6.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaslCondition {
    Aborted,
    AccountDisabled,
    CredentialsExpired,
    EncryptionRequired,
    IncorrectEncoding,
    InvalidAuthzid,
    InvalidMechanism,
    MalformedRequest,
    MechanismTooWeak,
    NotAuthorized,
    TemporaryAuthFailure,
}

/// How the negotiator reacts to a server-reported SASL failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Credentials were rejected; re-prompt and retry.
    Authentication,
    /// The mechanism itself is unusable; try the next mechanism.
    MechanismRejected,
    /// Anything else; propagate untouched.
    Unclassified,
}

impl SaslCondition {
    /// All known conditions.
    pub const ALL: [SaslCondition; 11] = [
        Self::Aborted,
        Self::AccountDisabled,
        Self::CredentialsExpired,
        Self::EncryptionRequired,
        Self::IncorrectEncoding,
        Self::InvalidAuthzid,
        Self::InvalidMechanism,
        Self::MalformedRequest,
        Self::MechanismTooWeak,
        Self::NotAuthorized,
        Self::TemporaryAuthFailure,
    ];

    /// Wire name of the condition element.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aborted => "aborted",
            Self::AccountDisabled => "account-disabled",
            Self::CredentialsExpired => "credentials-expired",
            Self::EncryptionRequired => "encryption-required",
            Self::IncorrectEncoding => "incorrect-encoding",
            Self::InvalidAuthzid => "invalid-authzid",
            Self::InvalidMechanism => "invalid-mechanism",
            Self::MalformedRequest => "malformed-request",
            Self::MechanismTooWeak => "mechanism-too-weak",
            Self::NotAuthorized => "not-authorized",
            Self::TemporaryAuthFailure => "temporary-auth-failure",
        }
    }

    /// Classify this condition.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::CredentialsExpired
            | Self::AccountDisabled
            | Self::InvalidAuthzid
            | Self::NotAuthorized
            | Self::TemporaryAuthFailure => FailureClass::Authentication,
            Self::InvalidMechanism | Self::MechanismTooWeak | Self::EncryptionRequired => {
                FailureClass::MechanismRejected
            }
            Self::Aborted | Self::IncorrectEncoding | Self::MalformedRequest => {
                FailureClass::Unclassified
            }
        }
    }
}

impl std::fmt::Display for SaslCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaslCondition {
    type Err = UnknownCondition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCondition(s.to_string()))
    }
}

/// A condition string outside RFC 6120.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown SASL condition: {0}")]
pub struct UnknownCondition(pub String);

/// A SASL failure as reported by the peer.
///
/// The condition is kept as the raw string so that conditions we do not know
/// about survive unchanged on their way up to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslFailure {
    pub condition: String,
    pub text: Option<String>,
}

impl std::fmt::Display for SaslFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SASL failure: {}", self.condition)?;
        if let Some(text) = &self.text {
            write!(f, " ({})", text)?;
        }
        Ok(())
    }
}

impl std::error::Error for SaslFailure {}

impl SaslFailure {
    /// Create a failure from a known condition.
    pub fn new(condition: SaslCondition) -> Self {
        Self {
            condition: condition.as_str().to_string(),
            text: None,
        }
    }

    /// Create a failure from an arbitrary condition string.
    pub fn from_condition(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            text: None,
        }
    }

    /// Attach the human readable text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Parse a `<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>` element.
    ///
    /// The first child that is not `<text/>` names the condition. A failure
    /// without any condition child is treated as `not-authorized`, which is
    /// what servers mean by a bare failure in practice.
    pub fn from_element(element: &Element) -> Option<Self> {
        if !element.is(NS_SASL, "failure") {
            return None;
        }
        let condition = element
            .children
            .iter()
            .find(|c| c.name.local != "text")
            .map(|c| c.name.local.clone())
            .unwrap_or_else(|| SaslCondition::NotAuthorized.as_str().to_string());
        let text = element
            .child(NS_SASL, "text")
            .and_then(|t| t.text.clone());
        Some(Self { condition, text })
    }

    /// The parsed condition, if it is a known one.
    pub fn known_condition(&self) -> Option<SaslCondition> {
        self.condition.parse().ok()
    }

    /// Classify the failure. Unknown conditions are unclassified.
    pub fn class(&self) -> FailureClass {
        self.known_condition()
            .map(|c| c.class())
            .unwrap_or(FailureClass::Unclassified)
    }
}

/// Stream security negotiation errors.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// TLS could not be established when required, or the upgrade failed.
    #[error("TLS failure: {reason}")]
    Tls {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The peer offers no SASL at all, or no common mechanism.
    #[error("SASL unavailable: {0}")]
    SaslUnavailable(String),

    /// Credentials were rejected or the user aborted.
    #[error("authentication failed: {text}")]
    Authentication {
        condition: Option<SaslCondition>,
        text: String,
    },

    /// A SASL failure outside the authentication and mechanism classes.
    #[error(transparent)]
    Sasl(#[from] SaslFailure),

    /// Waiting for stream features took too long.
    #[error("timed out after {0:?} waiting for stream features")]
    Timeout(Duration),

    /// Stream or transport error reported by the stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid negotiation setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A negotiation invariant did not hold.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Text of the authentication failure raised on user abort.
pub const ABORTED_BY_USER: &str = "aborted by user";

impl NegotiationError {
    /// TLS failure without an underlying cause.
    pub fn tls(reason: impl Into<String>) -> Self {
        Self::Tls {
            reason: reason.into(),
            source: None,
        }
    }

    /// TLS failure wrapping the underlying cause.
    pub fn tls_caused_by(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Tls {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    /// Authentication failure raised when the credential source aborts.
    pub fn aborted_by_user() -> Self {
        Self::Authentication {
            condition: None,
            text: ABORTED_BY_USER.to_string(),
        }
    }

    /// Convert a classified authentication-class SASL failure.
    pub fn from_auth_failure(failure: &SaslFailure) -> Self {
        Self::Authentication {
            condition: failure.known_condition(),
            text: failure
                .text
                .clone()
                .unwrap_or_else(|| failure.condition.clone()),
        }
    }

    /// Whether this is the authentication failure raised on user abort.
    pub fn is_user_abort(&self) -> bool {
        matches!(
            self,
            Self::Authentication { condition: None, text } if text == ABORTED_BY_USER
        )
    }
}

impl From<std::io::Error> for NegotiationError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type alias for negotiation operations.
pub type NegotiationResult<T> = Result<T, NegotiationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_display_round_trips_names() {
        for condition in SaslCondition::ALL {
            assert_eq!(condition.as_str().parse::<SaslCondition>(), Ok(condition));
        }
        assert!("no-such-thing".parse::<SaslCondition>().is_err());
    }

    #[test]
    fn condition_serde() {
        let json = serde_json::to_string(&SaslCondition::MechanismTooWeak).unwrap();
        assert_eq!(json, "\"mechanism-too-weak\"");

        let parsed: SaslCondition = serde_json::from_str("\"temporary-auth-failure\"").unwrap();
        assert_eq!(parsed, SaslCondition::TemporaryAuthFailure);
    }

    #[test]
    fn classification_is_disjoint() {
        let auth: Vec<_> = SaslCondition::ALL
            .iter()
            .filter(|c| c.class() == FailureClass::Authentication)
            .map(|c| c.as_str())
            .collect();
        assert_eq!(
            auth,
            vec![
                "account-disabled",
                "credentials-expired",
                "invalid-authzid",
                "not-authorized",
                "temporary-auth-failure",
            ]
        );

        let rejected: Vec<_> = SaslCondition::ALL
            .iter()
            .filter(|c| c.class() == FailureClass::MechanismRejected)
            .map(|c| c.as_str())
            .collect();
        assert_eq!(
            rejected,
            vec!["encryption-required", "invalid-mechanism", "mechanism-too-weak"]
        );
    }

    #[test]
    fn unknown_condition_is_unclassified() {
        let failure = SaslFailure::from_condition("policy-violation");
        assert_eq!(failure.class(), FailureClass::Unclassified);
        assert_eq!(failure.known_condition(), None);
    }

    #[test]
    fn failure_from_element() {
        let element = Element::new(NS_SASL, "failure")
            .with_child(Element::new(NS_SASL, "not-authorized"))
            .with_child(Element::new(NS_SASL, "text").with_text("bad password"));

        let failure = SaslFailure::from_element(&element).unwrap();
        assert_eq!(failure.condition, "not-authorized");
        assert_eq!(failure.text.as_deref(), Some("bad password"));
        assert_eq!(failure.class(), FailureClass::Authentication);

        let bare = SaslFailure::from_element(&Element::new(NS_SASL, "failure")).unwrap();
        assert_eq!(bare.known_condition(), Some(SaslCondition::NotAuthorized));

        assert!(SaslFailure::from_element(&Element::new(NS_SASL, "success")).is_none());
    }

    #[test]
    fn user_abort_is_recognised() {
        assert!(NegotiationError::aborted_by_user().is_user_abort());

        let rejected = NegotiationError::from_auth_failure(&SaslFailure::new(
            SaslCondition::NotAuthorized,
        ));
        assert!(!rejected.is_user_abort());
        assert_eq!(rejected.to_string(), "authentication failed: not-authorized");
    }
}
