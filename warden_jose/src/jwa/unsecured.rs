use crate::{error, jws};

/// Key material for the `none` algorithm
///
/// Signing produces an empty signature, and only an empty signature
/// verifies. Any other algorithm is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Unsecured;

impl jws::Signer for Unsecured {
    type Algorithm = jws::Algorithm;
    type Error = error::SigningError;

    fn can_sign(&self, alg: Self::Algorithm) -> bool {
        alg == jws::Algorithm::NONE
    }

    fn sign(&self, alg: Self::Algorithm, _data: &[u8]) -> Result<Vec<u8>, Self::Error> {
        if !self.can_sign(alg) {
            return Err(error::incompatible_algorithm(alg).into());
        }

        Ok(Vec::new())
    }
}

impl jws::Verifier for Unsecured {
    type Algorithm = jws::Algorithm;
    type Error = error::JwkVerifyError;

    fn can_verify(&self, alg: Self::Algorithm) -> bool {
        alg == jws::Algorithm::NONE
    }

    fn verify(
        &self,
        alg: Self::Algorithm,
        _data: &[u8],
        signature: &[u8],
    ) -> Result<(), Self::Error> {
        if !self.can_verify(alg) {
            return Err(error::incompatible_algorithm(alg).into());
        }

        if signature.is_empty() {
            Ok(())
        } else {
            Err(error::signature_mismatch().into())
        }
    }
}
