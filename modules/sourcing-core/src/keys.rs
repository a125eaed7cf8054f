// Canonical identifiers for cached records.
//
// Upstream search hits identify a candidate either by a numeric id or by a
// public profile URL. Both are mapped once, here, onto a single key type whose
// storage form carries its kind as a prefix, so the two never share a column
// value ambiguously.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid key: {0}")]
pub struct InvalidKey(pub String);

/// A candidate's canonical cache and session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CandidateKey {
    /// Upstream numeric id.
    Id(u64),
    /// Normalized `host/path` of the public profile URL, e.g. `linkedin.com/in/jane-doe`.
    Url(String),
}

impl CandidateKey {
    /// Normalize a profile URL: scheme, `www.`, query, fragment, trailing
    /// slash and case are dropped.
    pub fn from_profile_url(raw: &str) -> Result<Self, InvalidKey> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidKey(raw.to_string()));
        }
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };
        let parsed = url::Url::parse(&with_scheme).map_err(|_| InvalidKey(raw.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| InvalidKey(raw.to_string()))?
            .trim_start_matches("www.")
            .to_lowercase();
        let path = parsed.path().trim_end_matches('/').to_lowercase();
        if path.is_empty() {
            return Err(InvalidKey(raw.to_string()));
        }
        Ok(CandidateKey::Url(format!("{host}{path}")))
    }

    /// Pick the key for a search hit, preferring the numeric id.
    pub fn from_search_hit(id: Option<u64>, profile_url: Option<&str>) -> Option<Self> {
        match (id, profile_url) {
            (Some(id), _) => Some(CandidateKey::Id(id)),
            (None, Some(url)) => CandidateKey::from_profile_url(url).ok(),
            (None, None) => None,
        }
    }

    /// The identifier handed to the collect API.
    pub fn upstream_id(&self) -> String {
        match self {
            CandidateKey::Id(id) => id.to_string(),
            CandidateKey::Url(path) => format!("https://www.{path}"),
        }
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateKey::Id(id) => write!(f, "id:{id}"),
            CandidateKey::Url(path) => write!(f, "url:{path}"),
        }
    }
}

impl FromStr for CandidateKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("id:") {
            return id
                .parse()
                .map(CandidateKey::Id)
                .map_err(|_| InvalidKey(s.to_string()));
        }
        if let Some(path) = s.strip_prefix("url:") {
            if !path.is_empty() {
                return Ok(CandidateKey::Url(path.to_string()));
            }
        }
        Err(InvalidKey(s.to_string()))
    }
}

impl From<CandidateKey> for String {
    fn from(key: CandidateKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for CandidateKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A company's canonical cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CompanyKey {
    Id(String),
    /// Lowercased, whitespace-collapsed name, used when the profile has no company id.
    Name(String),
}

impl CompanyKey {
    pub fn from_id_or_name(id: Option<&str>, name: Option<&str>) -> Option<Self> {
        if let Some(id) = id.map(str::trim).filter(|s| !s.is_empty()) {
            return Some(CompanyKey::Id(id.to_string()));
        }
        let name = name?
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if name.is_empty() {
            None
        } else {
            Some(CompanyKey::Name(name))
        }
    }

    pub fn upstream_id(&self) -> &str {
        match self {
            CompanyKey::Id(id) | CompanyKey::Name(id) => id,
        }
    }
}

impl fmt::Display for CompanyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompanyKey::Id(id) => write!(f, "id:{id}"),
            CompanyKey::Name(name) => write!(f, "name:{name}"),
        }
    }
}

impl FromStr for CompanyKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("id", id)) if !id.is_empty() => Ok(CompanyKey::Id(id.to_string())),
            Some(("name", name)) if !name.is_empty() => Ok(CompanyKey::Name(name.to_string())),
            _ => Err(InvalidKey(s.to_string())),
        }
    }
}

impl From<CompanyKey> for String {
    fn from(key: CompanyKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for CompanyKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_urls_normalize_to_one_key() {
        let a = CandidateKey::from_profile_url("https://www.linkedin.com/in/Jane-Doe/").unwrap();
        let b = CandidateKey::from_profile_url("linkedin.com/in/jane-doe?trk=search").unwrap();
        let c = CandidateKey::from_profile_url("http://linkedin.com/in/jane-doe#about").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.to_string(), "url:linkedin.com/in/jane-doe");
    }

    #[test]
    fn id_and_url_keys_never_collide() {
        let id = CandidateKey::Id(42);
        let url = CandidateKey::from_profile_url("linkedin.com/in/42").unwrap();
        assert_ne!(id.to_string(), url.to_string());
    }

    #[test]
    fn storage_form_roundtrips() {
        for key in [
            CandidateKey::Id(7),
            CandidateKey::Url("linkedin.com/in/sam".into()),
        ] {
            let parsed: CandidateKey = key.to_string().parse().unwrap();
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn search_hit_prefers_numeric_id() {
        let key = CandidateKey::from_search_hit(Some(9), Some("linkedin.com/in/x"));
        assert_eq!(key, Some(CandidateKey::Id(9)));
        assert_eq!(CandidateKey::from_search_hit(None, None), None);
    }

    #[test]
    fn bare_host_is_not_a_profile() {
        assert!(CandidateKey::from_profile_url("https://linkedin.com/").is_err());
        assert!(CandidateKey::from_profile_url("   ").is_err());
    }

    #[test]
    fn unprefixed_storage_key_is_rejected() {
        assert!("12345".parse::<CandidateKey>().is_err());
        assert!("id:abc".parse::<CandidateKey>().is_err());
    }

    #[test]
    fn company_key_prefers_id_and_normalizes_names() {
        assert_eq!(
            CompanyKey::from_id_or_name(Some("881"), Some("Acme")),
            Some(CompanyKey::Id("881".into()))
        );
        assert_eq!(
            CompanyKey::from_id_or_name(None, Some("  Acme   Robotics ")),
            Some(CompanyKey::Name("acme robotics".into()))
        );
        assert_eq!(CompanyKey::from_id_or_name(Some(" "), None), None);
    }

    #[test]
    fn serde_uses_storage_form() {
        let json = serde_json::to_string(&CandidateKey::Id(3)).unwrap();
        assert_eq!(json, "\"id:3\"");
        let back: CandidateKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CandidateKey::Id(3));
    }
}
