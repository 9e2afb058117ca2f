//! JWKS fetch and key selection (spec.md section 4.1/4.2): RS256 keys only,
//! matched by `kid`, `use=sig`.

use jsonwebtoken::DecodingKey;
use serde::Deserialize;

use crate::error::FederatorTokenError;

#[derive(Debug, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
pub struct Jwk {
    pub kid: Option<String>,
    pub kty: String,
    #[serde(rename = "use")]
    pub use_: Option<String>,
    pub alg: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

impl Jwks {
    /// First RSA key whose `kid` matches (when the token header carries one)
    /// and whose `use`/`alg` are `sig`/`RS256` (or absent — some IDPs omit
    /// `use`/`alg` on individual JWKS entries).
    pub fn find_decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, FederatorTokenError> {
        let key = self
            .keys
            .iter()
            .find(|k| {
                k.kty == "RSA"
                    && k.n.is_some()
                    && k.e.is_some()
                    && matches!(k.use_.as_deref(), None | Some("sig"))
                    && matches!(k.alg.as_deref(), None | Some("RS256"))
                    && match kid {
                        Some(wanted) => k.kid.as_deref() == Some(wanted),
                        None => true,
                    }
            })
            .ok_or_else(|| FederatorTokenError::NoMatchingKey {
                kid: kid.map(str::to_string),
            })?;

        DecodingKey::from_rsa_components(key.n.as_ref().unwrap(), key.e.as_ref().unwrap())
            .map_err(FederatorTokenError::Verification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsa_key(kid: &str, use_: Option<&str>, alg: Option<&str>) -> Jwk {
        Jwk {
            kid: Some(kid.to_string()),
            kty: "RSA".to_string(),
            use_: use_.map(str::to_string),
            alg: alg.map(str::to_string),
            n: Some("sXch".to_string()),
            e: Some("AQAB".to_string()),
        }
    }

    #[test]
    fn selects_key_matching_kid_use_and_alg() {
        let jwks = Jwks {
            keys: vec![
                rsa_key("other", Some("sig"), Some("RS256")),
                rsa_key("wanted", Some("sig"), Some("RS256")),
            ],
        };
        assert!(jwks.find_decoding_key(Some("wanted")).is_ok());
    }

    #[test]
    fn rejects_key_with_wrong_use() {
        let jwks = Jwks {
            keys: vec![rsa_key("wanted", Some("enc"), Some("RS256"))],
        };
        assert!(matches!(
            jwks.find_decoding_key(Some("wanted")),
            Err(FederatorTokenError::NoMatchingKey { .. })
        ));
    }

    #[test]
    fn rejects_non_rsa_keys() {
        let jwks = Jwks {
            keys: vec![Jwk {
                kid: Some("wanted".to_string()),
                kty: "EC".to_string(),
                use_: Some("sig".to_string()),
                alg: Some("RS256".to_string()),
                n: None,
                e: None,
            }],
        };
        assert!(jwks.find_decoding_key(Some("wanted")).is_err());
    }

    #[test]
    fn falls_back_to_any_key_when_token_header_has_no_kid() {
        let jwks = Jwks {
            keys: vec![rsa_key("only", Some("sig"), Some("RS256"))],
        };
        assert!(jwks.find_decoding_key(None).is_ok());
    }

    #[test]
    fn no_match_returns_kid_in_error() {
        let jwks = Jwks { keys: vec![] };
        let err = jwks.find_decoding_key(Some("missing")).unwrap_err();
        assert!(matches!(err, FederatorTokenError::NoMatchingKey { kid: Some(k) } if k == "missing"));
    }
}
