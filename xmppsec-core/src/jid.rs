//! Jabber identifiers.

use std::str::FromStr;

use thiserror::Error;

/// Maximum length of each JID part in bytes (RFC 7622).
const MAX_PART_LEN: usize = 1023;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JidParseError {
    #[error("domainpart is empty")]
    EmptyDomain,
    #[error("localpart is empty")]
    EmptyLocal,
    #[error("resourcepart is empty")]
    EmptyResource,
    #[error("{0} is longer than {MAX_PART_LEN} bytes")]
    TooLong(&'static str),
}

/// `[localpart@]domainpart[/resourcepart]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    localpart: Option<String>,
    domainpart: String,
    resourcepart: Option<String>,
}

impl Jid {
    pub fn localpart(&self) -> Option<&str> {
        self.localpart.as_deref()
    }

    pub fn domainpart(&self) -> &str {
        &self.domainpart
    }

    pub fn resourcepart(&self) -> Option<&str> {
        self.resourcepart.as_deref()
    }

    /// The JID without its resource.
    pub fn bare(&self) -> Jid {
        Jid {
            localpart: self.localpart.clone(),
            domainpart: self.domainpart.clone(),
            resourcepart: None,
        }
    }

    pub fn is_bare(&self) -> bool {
        self.resourcepart.is_none()
    }
}

impl FromStr for Jid {
    type Err = JidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The resource may itself contain '@' and '/', so split it off first.
        let (rest, resourcepart) = match s.split_once('/') {
            Some((rest, resource)) => {
                if resource.is_empty() {
                    return Err(JidParseError::EmptyResource);
                }
                (rest, Some(resource))
            }
            None => (s, None),
        };

        let (localpart, domainpart) = match rest.split_once('@') {
            Some((local, domain)) => {
                if local.is_empty() {
                    return Err(JidParseError::EmptyLocal);
                }
                (Some(local), domain)
            }
            None => (None, rest),
        };

        let domainpart = domainpart.strip_suffix('.').unwrap_or(domainpart);
        if domainpart.is_empty() {
            return Err(JidParseError::EmptyDomain);
        }

        for (name, part) in [
            ("localpart", localpart),
            ("domainpart", Some(domainpart)),
            ("resourcepart", resourcepart),
        ] {
            if part.map(str::len).unwrap_or(0) > MAX_PART_LEN {
                return Err(JidParseError::TooLong(name));
            }
        }

        Ok(Jid {
            localpart: localpart.map(str::to_string),
            domainpart: domainpart.to_lowercase(),
            resourcepart: resourcepart.map(str::to_string),
        })
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(local) = &self.localpart {
            write!(f, "{}@", local)?;
        }
        f.write_str(&self.domainpart)?;
        if let Some(resource) = &self.resourcepart {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}
