//! JOSE primitives used by the warden authorization server
//!
//! This crate covers the parts of the JOSE family of standards that the
//! server needs in order to publish and use its signing keys:
//!
//! * JSON Web Signature (JWS) algorithms: [RFC7515][]
//! * JSON Web Key (JWK) and key sets: [RFC7517][]
//! * JSON Web Algorithms (JWA): [RFC7518][]
//! * Compact JSON Web Tokens (JWT): [RFC7519][]
//!
//! Supported signing algorithms are `HS256`/`HS384`/`HS512`,
//! `RS256`/`RS384`/`RS512` (PKCS#1 v1.5), `ES256`/`ES384`/`ES512`
//! (P-256, P-384 and P-521), and `none`.
//!
//! [RFC7515]: https://tools.ietf.org/html/rfc7515
//! [RFC7517]: https://tools.ietf.org/html/rfc7517
//! [RFC7518]: https://tools.ietf.org/html/rfc7518
//! [RFC7519]: https://tools.ietf.org/html/rfc7519
//!
//! # Example
//!
//! ```
//! use aliri_base64::Base64UrlRef;
//! use warden_jose::{jwa, jwk, jws, jwt, Jwk};
//!
//! let secret = Base64UrlRef::from_slice(b"a shared secret").to_owned();
//! let key = Jwk::from(jwa::Hmac::new(secret))
//!     .with_algorithm(jws::Algorithm::HS256)
//!     .with_key_id(jwk::KeyId::from_static("shared"));
//!
//! let headers = jwt::Headers::new(jws::Algorithm::HS256).with_key_id(jwk::KeyId::from_static("shared"));
//! let claims = serde_json::json!({ "sub": "warden" });
//!
//! let token = jwt::encode(&headers, &claims, &key).unwrap();
//!
//! assert!(jwt::verify(&token, jws::Algorithm::HS256, &key));
//! assert!(!jwt::verify(&token, jws::Algorithm::HS384, &key));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod error;
pub mod jwa;
pub mod jwk;
mod jwks;
pub mod jws;
pub mod jwt;


#[doc(inline)]
pub use jwk::Jwk;
#[doc(inline)]
pub use jwks::Jwks;
#[doc(inline)]
pub use jwt::{Jwt, JwtRef};
