use std::convert::TryFrom;

use aliri_base64::{Base64Url, Base64UrlRef};
use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcKey, EcKeyRef, EcPoint, PointConversionForm},
    ecdsa::EcdsaSig,
    error::ErrorStack,
    hash::MessageDigest,
    pkey::HasPublic,
};
use serde::{Deserialize, Serialize};

use super::{Curve, SigningAlgorithm};
use crate::{error, jws};

/// ECC public key
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PublicKeyDto", into = "PublicKeyDto")]
pub struct PublicKey {
    curve: Curve,
    x: Base64Url,
    y: Base64Url,
    uncompressed_point: Vec<u8>,
}

impl PublicKey {
    /// Constructs a public key from its affine coordinates
    ///
    /// # Errors
    ///
    /// The coordinates do not describe a point on the curve.
    pub fn from_coordinates(
        curve: Curve,
        x: &Base64UrlRef,
        y: &Base64UrlRef,
    ) -> Result<Self, error::KeyRejected> {
        let group = curve.to_group().map_err(error::key_rejected)?;
        let x = BigNum::from_slice(x.as_slice()).map_err(error::key_rejected)?;
        let y = BigNum::from_slice(y.as_slice()).map_err(error::key_rejected)?;

        let key = EcKey::from_public_key_affine_coordinates(&group, &x, &y)
            .map_err(error::key_rejected)?;
        key.check_key().map_err(error::key_rejected)?;

        Self::from_openssl_eckey(&*key)
    }

    pub(crate) fn from_openssl_eckey<T: HasPublic>(
        key: &EcKeyRef<T>,
    ) -> Result<Self, error::KeyRejected> {
        let group = key.group();
        let curve =
            Curve::from_group(group).ok_or_else(|| error::key_rejected("unsupported curve"))?;

        let mut ctx = BigNumContext::new().map_err(error::key_rejected)?;
        let mut x = BigNum::new().map_err(error::key_rejected)?;
        let mut y = BigNum::new().map_err(error::key_rejected)?;

        key.public_key()
            .affine_coordinates_gfp(group, &mut x, &mut y, &mut ctx)
            .map_err(error::key_rejected)?;

        let size = curve.coordinate_size() as i32;
        let x = x.to_vec_padded(size).map_err(error::key_rejected)?;
        let y = y.to_vec_padded(size).map_err(error::key_rejected)?;

        let uncompressed_point = key
            .public_key()
            .to_bytes(group, PointConversionForm::UNCOMPRESSED, &mut ctx)
            .map_err(error::key_rejected)?;

        Ok(Self {
            curve,
            x: Base64Url::from_raw(x),
            y: Base64Url::from_raw(y),
            uncompressed_point,
        })
    }

    /// The curve this key lies on
    #[must_use]
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// The x coordinate of the public point
    pub fn x(&self) -> &Base64UrlRef {
        &self.x
    }

    /// The y coordinate of the public point
    pub fn y(&self) -> &Base64UrlRef {
        &self.y
    }

    fn verify_with_openssl(&self, data: &[u8], signature: &[u8]) -> Result<bool, ErrorStack> {
        let size = self.curve.coordinate_size();
        if signature.len() != size * 2 {
            return Ok(false);
        }

        let (r, s) = signature.split_at(size);
        let sig = EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;

        let group = self.curve.to_group()?;
        let mut ctx = BigNumContext::new()?;
        let point = EcPoint::from_bytes(&group, &self.uncompressed_point, &mut ctx)?;
        let key = EcKey::from_public_key(&group, &point)?;

        let digest = openssl::hash::hash(MessageDigest::sha512(), data)?;
        sig.verify(&digest, &*key)
    }
}

impl jws::Verifier for PublicKey {
    type Algorithm = SigningAlgorithm;
    type Error = error::SignatureMismatch;

    fn can_verify(&self, alg: Self::Algorithm) -> bool {
        self.curve == Curve::from(alg)
    }

    fn verify(
        &self,
        alg: Self::Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error> {
        if !self.can_verify(alg) {
            return Err(error::signature_mismatch());
        }

        match alg.ring_verification_algorithm() {
            Some(ring_alg) => {
                ring::signature::UnparsedPublicKey::new(ring_alg, &self.uncompressed_point)
                    .verify(data, signature)
                    .map_err(|_| error::signature_mismatch())
            }
            None => match self.verify_with_openssl(data, signature) {
                Ok(true) => Ok(()),
                Ok(false) | Err(_) => Err(error::signature_mismatch()),
            },
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub(super) struct PublicKeyDto {
    #[serde(rename = "crv")]
    pub curve: Curve,
    pub x: Base64Url,
    pub y: Base64Url,
}

impl TryFrom<PublicKeyDto> for PublicKey {
    type Error = error::KeyRejected;

    fn try_from(dto: PublicKeyDto) -> Result<Self, Self::Error> {
        Self::from_coordinates(dto.curve, &dto.x, &dto.y)
    }
}

impl From<PublicKey> for PublicKeyDto {
    fn from(key: PublicKey) -> Self {
        Self {
            curve: key.curve,
            x: key.x,
            y: key.y,
        }
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::jwa::EllipticCurve;

    #[test]
    fn coordinates_are_padded_to_curve_size() -> Result<()> {
        for curve in [Curve::P256, Curve::P384, Curve::P521] {
            let key = EllipticCurve::generate(curve)?;
            let public = key.public_key();
            assert_eq!(public.x().as_slice().len(), curve.coordinate_size());
            assert_eq!(public.y().as_slice().len(), curve.coordinate_size());
        }
        Ok(())
    }

    #[test]
    fn rejects_points_off_the_curve() {
        let x = Base64Url::from_raw(vec![1; 32]);
        let y = Base64Url::from_raw(vec![2; 32]);
        assert!(PublicKey::from_coordinates(Curve::P256, &x, &y).is_err());
    }

    #[test]
    fn json_form_carries_curve_and_coordinates() -> Result<()> {
        let key = EllipticCurve::generate(Curve::P384)?;
        let json = serde_json::to_string(key.public_key())?;
        let parsed: PublicKey = serde_json::from_str(&json)?;

        assert_eq!(&parsed, key.public_key());
        assert!(json.contains("\"crv\":\"P-384\""));
        Ok(())
    }
}
