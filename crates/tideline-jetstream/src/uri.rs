use thiserror::Error;

/// A parsed `at://{did}/{collection}/{rkey}` locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub did: String,
    pub collection: String,
    pub rkey: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AtUriError {
    #[error("uri missing at:// prefix: {0}")]
    MissingPrefix(String),
    #[error("uri missing rkey: {0}")]
    MissingRkey(String),
    #[error("uri has an empty component: {0}")]
    EmptyComponent(String),
}

impl AtUri {
    pub fn parse(uri: &str) -> Result<Self, AtUriError> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| AtUriError::MissingPrefix(uri.to_string()))?;

        let mut parts = rest.splitn(3, '/');
        let did = parts.next().unwrap_or_default();
        let collection = parts.next().unwrap_or_default();
        let rkey = parts
            .next()
            .ok_or_else(|| AtUriError::MissingRkey(uri.to_string()))?;

        if did.is_empty() || collection.is_empty() || rkey.is_empty() {
            return Err(AtUriError::EmptyComponent(uri.to_string()));
        }

        Ok(Self {
            did: did.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        })
    }

    pub fn build(did: &str, collection: &str, rkey: &str) -> String {
        format!("at://{did}/{collection}/{rkey}")
    }
}

impl std::fmt::Display for AtUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_valid_uri() {
        let uri = AtUri::parse("at://did:plc:abc/app.bsky.feed.post/3xyz").unwrap();
        assert_eq!(uri.did, "did:plc:abc");
        assert_eq!(uri.collection, "app.bsky.feed.post");
        assert_eq!(uri.rkey, "3xyz");
    }

    #[test]
    fn rejects_missing_prefix() {
        let err = AtUri::parse("did:plc:abc/app.bsky.feed.post/3xyz").unwrap_err();
        assert!(matches!(err, AtUriError::MissingPrefix(_)));
    }

    #[test]
    fn rejects_missing_rkey() {
        let err = AtUri::parse("at://did:plc:abc/app.bsky.feed.post").unwrap_err();
        assert!(matches!(err, AtUriError::MissingRkey(_)));
    }

    #[test]
    fn rejects_empty_component() {
        let err = AtUri::parse("at:///app.bsky.feed.post/3xyz").unwrap_err();
        assert!(matches!(err, AtUriError::EmptyComponent(_)));
    }

    #[test]
    fn display_round_trips() {
        let raw = "at://did:plc:abc/app.bsky.feed.post/3xyz";
        let uri = AtUri::parse(raw).unwrap();
        assert_eq!(uri.to_string(), raw);
    }

    #[test]
    fn build_matches_parse() {
        let built = AtUri::build("did:plc:abc", "app.bsky.feed.post", "3xyz");
        let parsed = AtUri::parse(&built).unwrap();
        assert_eq!(parsed.did, "did:plc:abc");
    }
}
