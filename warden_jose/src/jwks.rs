use aliri_clock::UnixTime;
use serde::{Deserialize, Serialize};

use crate::{jwk, jws, Jwk};

/// A JSON Web Key Set (JWKS)
///
/// Besides being the published form of the server's keys, the key set is
/// where keys are looked up for signing (by algorithm) and verification
/// (by key ID).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    #[serde(deserialize_with = "deserialize_keys")]
    keys: Vec<Jwk>,
}

impl Jwks {
    /// Parses a key set from its JSON form
    ///
    /// Keys that cannot be understood are skipped with a warning. A
    /// certificate chain that fails to parse leaves its key usable.
    ///
    /// # Errors
    ///
    /// The text is not a JSON object with a `keys` array.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Renders the key set as JSON
    ///
    /// # Errors
    ///
    /// Serialization failed.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Adds a key to the set
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// A view of the keys in this set
    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    /// The number of keys in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keeps only the keys matching the predicate
    pub fn retain(&mut self, f: impl FnMut(&Jwk) -> bool) {
        self.keys.retain(f);
    }

    /// Removes the key with the given ID, returning it
    pub fn remove_key(&mut self, kid: &jwk::KeyIdRef) -> Option<Jwk> {
        let idx = self.keys.iter().position(|k| k.key_id() == Some(kid))?;
        Some(self.keys.remove(idx))
    }

    /// Consumes the set, returning its keys
    pub fn into_keys(self) -> Vec<Jwk> {
        self.keys
    }

    /// Finds the key with the given ID
    pub fn find(&self, kid: &jwk::KeyIdRef) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.key_id() == Some(kid))
    }

    /// Finds the key to sign with for the given algorithm
    ///
    /// Only keys that name the algorithm and have not expired as of `now`
    /// qualify. Among them, the key with the latest expiration wins. Keys
    /// without an expiration are only picked when no expiring key qualifies,
    /// the most recently added one first.
    pub fn find_by_algorithm(&self, alg: jws::Algorithm, now: UnixTime) -> Option<&Jwk> {
        let live = self
            .keys
            .iter()
            .filter(|k| k.algorithm() == Some(alg) && !k.is_expired_at(now));

        let mut latest: Option<(&Jwk, u64)> = None;
        let mut unbounded = None;

        for key in live {
            match key.expires_at() {
                Some(exp) => match latest {
                    Some((_, best)) if best >= exp => {}
                    _ => latest = Some((key, exp)),
                },
                None => unbounded = Some(key),
            }
        }

        latest.map(|(k, _)| k).or(unbounded)
    }

    /// Gets the best key based on the key id (if provided) and algorithm requested
    ///
    /// Keys that name a different key ID, algorithm or usage never match.
    /// Otherwise a matching key ID weighs more than a matching algorithm,
    /// which weighs more than a matching usage.
    pub fn get_key_by_opt(
        &self,
        kid: Option<&'_ jwk::KeyIdRef>,
        alg: jws::Algorithm,
    ) -> Option<&Jwk> {
        let alg_usage = alg.to_usage();

        let best = self.keys.iter().fold(None, move |best, k| {
            let mut score = 0;

            if !k.is_compatible(alg) {
                return best;
            }

            if let Some(kid) = kid {
                match k.key_id() {
                    Some(key_id) if key_id == kid => score += 4,
                    Some(_) => return best,
                    None => {}
                }
            }

            if let Some(algorithm) = k.algorithm() {
                if algorithm == alg {
                    score += 2;
                } else {
                    return best;
                }
            }

            if let Some(key_usage) = k.usage() {
                if key_usage == alg_usage {
                    score += 1;
                } else {
                    return best;
                }
            }

            match best {
                Some((_, best_score)) if best_score < score => Some((k, score)),
                None => Some((k, score)),
                _ => best,
            }
        });

        best.map(|(b, _)| b)
    }
}

impl FromIterator<Jwk> for Jwks {
    fn from_iter<I: IntoIterator<Item = Jwk>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

impl Extend<Jwk> for Jwks {
    fn extend<I: IntoIterator<Item = Jwk>>(&mut self, iter: I) {
        self.keys.extend(iter);
    }
}


fn deserialize_keys<'de, D>(deserializer: D) -> Result<Vec<Jwk>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct MaybeJwksVisitor;

    impl<'de> serde::de::Visitor<'de> for MaybeJwksVisitor {
        type Value = Vec<Jwk>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a list of JWK objects")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
            let mut index = 0_usize;

            while let Some(value) = seq.next_element()? {
                match value {
                    MaybeJwk::Jwk(jwk) => values.push(*jwk),
                    MaybeJwk::Unknown(key) => {
                        tracing::warn!(
                            jwks.idx = index,
                            jwk.kid = ?key.kid,
                            "jwk.use" = ?key.r#use,
                            jwk.alg = ?key.alg,
                            "ignoring unknown JWK"
                        );
                    }
                }
                index += 1;
            }

            Ok(values)
        }
    }

    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum MaybeJwk {
        Jwk(Box<Jwk>),
        Unknown(JwkLike),
    }

    #[derive(serde::Deserialize)]
    struct JwkLike {
        #[serde(default)]
        kid: Option<String>,
        #[serde(rename = "use", default)]
        r#use: Option<String>,
        #[serde(default)]
        alg: Option<String>,
    }

    deserializer.deserialize_seq(MaybeJwksVisitor)
}
