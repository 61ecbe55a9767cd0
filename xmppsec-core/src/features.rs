//! Stream feature snapshots.

use crate::stream::{Element, QName, NS_SASL, NS_STARTTLS};

/// Features advertised by the peer at one point in stream history.
///
/// A snapshot is immutable. Every stream reset yields a new one, and the old
/// snapshot must not be consulted afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFeatures {
    starttls: Option<StartTls>,
    mechanisms: Option<Vec<String>>,
    other: Vec<QName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StartTls {
    required: bool,
}

impl StreamFeatures {
    /// An empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise STARTTLS.
    pub fn with_starttls(mut self, required: bool) -> Self {
        self.starttls = Some(StartTls { required });
        self
    }

    /// Advertise SASL with the given mechanism names. Empty names are dropped.
    pub fn with_mechanisms<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mechanisms = Some(
            names
                .into_iter()
                .map(Into::into)
                .filter(|n| !n.is_empty())
                .collect(),
        );
        self
    }

    /// Advertise some other feature.
    pub fn with_feature(mut self, name: QName) -> Self {
        self.other.push(name);
        self
    }

    /// Parse a `<stream:features/>` element.
    pub fn from_element(element: &Element) -> Self {
        let mut features = Self::new();
        for child in &element.children {
            if child.is(NS_STARTTLS, "starttls") {
                features = features.with_starttls(child.child(NS_STARTTLS, "required").is_some());
            } else if child.is(NS_SASL, "mechanisms") {
                features = features.with_mechanisms(
                    child
                        .children_named(NS_SASL, "mechanism")
                        .filter_map(|m| m.text.as_deref())
                        .map(str::trim),
                );
            } else {
                features = features.with_feature(child.name.clone());
            }
        }
        features
    }

    pub fn supports_starttls(&self) -> bool {
        self.starttls.is_some()
    }

    /// Whether the peer marked STARTTLS as mandatory.
    pub fn starttls_required(&self) -> bool {
        self.starttls.map(|s| s.required).unwrap_or(false)
    }

    /// The advertised SASL mechanism names, or `None` if SASL is not offered
    /// at all.
    pub fn sasl_mechanisms(&self) -> Option<&[String]> {
        self.mechanisms.as_deref()
    }

    /// Whether a feature element with this name was advertised.
    pub fn has_feature(&self, namespace: &str, local: &str) -> bool {
        match (namespace, local) {
            (NS_STARTTLS, "starttls") => self.supports_starttls(),
            (NS_SASL, "mechanisms") => self.mechanisms.is_some(),
            _ => self
                .other
                .iter()
                .any(|n| n.namespace == namespace && n.local == local),
        }
    }
}
