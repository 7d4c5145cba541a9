//! Manifest typing and the two synthesized client documents.
//!
//! A DDM client synchronizes against two server-synthesized JSON
//! documents: Declaration Items (the full manifest, bucketed by
//! manifest type) and Synchronization Tokens (a summary token plus a
//! timestamp). Both are built incrementally from one pass over an
//! enrollment's declarations via the add/finalize builders here.

use serde::{Deserialize, Serialize};
use sha2::digest::DynDigest;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Coarse classification of a declaration type.
///
/// Derived from the third dot-separated component after the
/// `com.apple.` prefix: `com.apple.configuration.account.mail` is a
/// [`ManifestType::Configuration`]. Types outside that shape have no
/// manifest type and are not advertised to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestType {
    /// An activation declaration.
    Activation,
    /// An asset declaration.
    Asset,
    /// A configuration declaration.
    Configuration,
    /// A management declaration.
    Management,
}

impl ManifestType {
    /// Parses the manifest type from a full declaration type string.
    ///
    /// Returns `None` for types that do not match the
    /// `com.apple.<bucket>...` shape or name an unrecognized bucket.
    #[must_use]
    pub fn from_declaration_type(t: &str) -> Option<Self> {
        let rest = t.strip_prefix("com.apple.")?;
        let bucket = rest.split('.').next().unwrap_or(rest);
        match bucket {
            "activation" => Some(Self::Activation),
            "asset" => Some(Self::Asset),
            "configuration" => Some(Self::Configuration),
            "management" => Some(Self::Management),
            _ => None,
        }
    }

    /// Returns the singular lowercase name, e.g. `"configuration"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Activation => "activation",
            Self::Asset => "asset",
            Self::Configuration => "configuration",
            Self::Management => "management",
        }
    }
}

/// Constructor for the digest used to accumulate declaration tokens.
///
/// The protocol needs only determinism and a low collision rate, not
/// cryptographic strength; any fixed-output digest works. The factory
/// is threaded explicitly through every component that derives
/// tokens; there is no ambient process-wide hash choice.
pub type NewHash = fn() -> Box<dyn DynDigest>;

/// The default [`NewHash`]: SHA-256.
#[must_use]
pub fn sha256_hasher() -> Box<dyn DynDigest> {
    Box::new(Sha256::new())
}

/// One manifest entry: a declaration identifier and its server token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestDeclaration {
    /// Declaration identifier.
    pub identifier: String,
    /// The declaration's current server token.
    pub server_token: String,
}

/// The four manifest-type buckets of a Declaration Items document.
///
/// All four serialize even when empty; Apple documents them as
/// required fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestDeclarationItems {
    /// Activation declarations.
    pub activations: Vec<ManifestDeclaration>,
    /// Asset declarations.
    pub assets: Vec<ManifestDeclaration>,
    /// Configuration declarations.
    pub configurations: Vec<ManifestDeclaration>,
    /// Management declarations.
    pub management: Vec<ManifestDeclaration>,
}

/// The Declaration Items document a DDM client synchronizes against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeclarationItems {
    /// Declarations bucketed by manifest type.
    pub declarations: ManifestDeclarationItems,
    /// Summary token over all declarations.
    pub declarations_token: String,
}

/// The inner Synchronization Tokens structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncTokens {
    /// Summary token over all declarations; same derivation as in
    /// [`DeclarationItems`].
    pub declarations_token: String,
    /// Time of synthesis, UTC, truncated to whole seconds.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// The Tokens response document wrapping [`SyncTokens`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensResponse {
    /// The synchronization tokens.
    #[serde(rename = "SyncTokens")]
    pub sync_tokens: SyncTokens,
}

fn token_hash_write(hasher: &mut dyn DynDigest, server_token: &str) {
    hasher.update(server_token.as_bytes());
}

fn token_hash_finalize(hasher: Box<dyn DynDigest>) -> String {
    hex::encode(hasher.finalize())
}

/// Incrementally builds a [`DeclarationItems`] document.
///
/// `add` is called once per declaration of one enrollment, then
/// [`ItemsBuilder::finalize`] computes the declarations token. The
/// token accumulation is order-sensitive; the bucket contents are
/// not.
pub struct ItemsBuilder {
    hasher: Box<dyn DynDigest>,
    items: DeclarationItems,
}

impl ItemsBuilder {
    /// Creates a builder using the given hash factory.
    #[must_use]
    pub fn new(new_hash: NewHash) -> Self {
        Self {
            hasher: new_hash(),
            items: DeclarationItems::default(),
        }
    }

    /// Adds one declaration to the document.
    ///
    /// Declarations with an unrecognized manifest type land in no
    /// bucket and are not advertised to the client, but every added
    /// declaration's token participates in the accumulation.
    pub fn add(&mut self, identifier: &str, declaration_type: &str, server_token: &str) {
        if let Some(manifest_type) = ManifestType::from_declaration_type(declaration_type) {
            let md = ManifestDeclaration {
                identifier: identifier.to_string(),
                server_token: server_token.to_string(),
            };
            let bucket = match manifest_type {
                ManifestType::Activation => &mut self.items.declarations.activations,
                ManifestType::Asset => &mut self.items.declarations.assets,
                ManifestType::Configuration => &mut self.items.declarations.configurations,
                ManifestType::Management => &mut self.items.declarations.management,
            };
            bucket.push(md);
        }
        token_hash_write(self.hasher.as_mut(), server_token);
    }

    /// Computes the declarations token and returns the document.
    #[must_use]
    pub fn finalize(mut self) -> DeclarationItems {
        self.items.declarations_token = token_hash_finalize(self.hasher);
        self.items
    }
}

/// Incrementally builds a [`TokensResponse`] document.
///
/// Token accumulation is identical to [`ItemsBuilder`]; bucketing is
/// skipped and the finalize step stamps the current time.
pub struct TokensBuilder {
    hasher: Box<dyn DynDigest>,
}

impl TokensBuilder {
    /// Creates a builder using the given hash factory.
    #[must_use]
    pub fn new(new_hash: NewHash) -> Self {
        Self {
            hasher: new_hash(),
        }
    }

    /// Adds one declaration's token to the accumulation.
    pub fn add(&mut self, server_token: &str) {
        token_hash_write(self.hasher.as_mut(), server_token);
    }

    /// Finalizes the token and stamps the timestamp.
    #[must_use]
    pub fn finalize(self) -> TokensResponse {
        let now = OffsetDateTime::now_utc();
        TokensResponse {
            sync_tokens: SyncTokens {
                declarations_token: token_hash_finalize(self.hasher),
                timestamp: now.replace_nanosecond(0).unwrap_or(now),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_type_parsing() {
        assert_eq!(
            ManifestType::from_declaration_type("com.apple.configuration.account.mail"),
            Some(ManifestType::Configuration)
        );
        assert_eq!(
            ManifestType::from_declaration_type("com.apple.activation.simple"),
            Some(ManifestType::Activation)
        );
        assert_eq!(
            ManifestType::from_declaration_type("com.apple.management"),
            Some(ManifestType::Management)
        );
        assert_eq!(ManifestType::from_declaration_type("com.example.test"), None);
        assert_eq!(
            ManifestType::from_declaration_type("com.apple.bogus.test"),
            None
        );
    }

    #[test]
    fn empty_buckets_serialize() {
        let items = ItemsBuilder::new(sha256_hasher).finalize();
        let json = serde_json::to_string(&items).unwrap();
        assert!(json.contains(r#""Activations":[]"#));
        assert!(json.contains(r#""Assets":[]"#));
        assert!(json.contains(r#""Configurations":[]"#));
        assert!(json.contains(r#""Management":[]"#));
        assert!(json.contains(r#""DeclarationsToken":"#));
    }

    #[test]
    fn unknown_manifest_type_dropped_from_buckets() {
        let mut b = ItemsBuilder::new(sha256_hasher);
        b.add("com.example.a", "com.example.unknown.type", "t1");
        let items = b.finalize();
        assert!(items.declarations.activations.is_empty());
        assert!(items.declarations.assets.is_empty());
        assert!(items.declarations.configurations.is_empty());
        assert!(items.declarations.management.is_empty());

        // the dropped declaration still fed the token accumulation
        let empty = ItemsBuilder::new(sha256_hasher).finalize();
        assert_ne!(items.declarations_token, empty.declarations_token);
    }

    #[test]
    fn token_is_order_sensitive() {
        let mut a = ItemsBuilder::new(sha256_hasher);
        a.add("a", "com.apple.configuration.a", "t1");
        a.add("b", "com.apple.configuration.b", "t2");

        let mut b = ItemsBuilder::new(sha256_hasher);
        b.add("b", "com.apple.configuration.b", "t2");
        b.add("a", "com.apple.configuration.a", "t1");

        assert_ne!(a.finalize().declarations_token, b.finalize().declarations_token);
    }

    #[test]
    fn both_builders_agree_on_token() {
        let mut items = ItemsBuilder::new(sha256_hasher);
        let mut tokens = TokensBuilder::new(sha256_hasher);
        for (id, t, tok) in [
            ("a", "com.apple.configuration.a", "t1"),
            ("b", "com.apple.asset.b", "t2"),
            ("c", "com.apple.activation.c", "t3"),
        ] {
            items.add(id, t, tok);
            tokens.add(tok);
        }
        assert_eq!(
            items.finalize().declarations_token,
            tokens.finalize().sync_tokens.declarations_token
        );
    }

    #[test]
    fn tokens_timestamp_is_whole_seconds() {
        let t = TokensBuilder::new(sha256_hasher).finalize();
        assert_eq!(t.sync_tokens.timestamp.nanosecond(), 0);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains(r#""SyncTokens":{"#));
        assert!(json.contains(r#""Timestamp":"#));
    }
}
