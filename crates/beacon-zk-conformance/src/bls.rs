//! BLS12-381 public key aggregation and point compression.

use blst::min_pk::{AggregatePublicKey, PublicKey, SecretKey};

use crate::ConformanceError;

fn bls_error(context: &str, err: blst::BLST_ERROR) -> ConformanceError {
    ConformanceError::InvalidInput(format!("{context}: {err:?}"))
}

/// Decode a compressed (48 byte) or uncompressed (96 byte) G1 public key
pub fn decode_pubkey(bytes: &[u8]) -> Result<PublicKey, ConformanceError> {
    PublicKey::deserialize(bytes).map_err(|err| bls_error("public key", err))
}

/// Aggregate the public keys whose participation bit is set, returning the compressed sum
pub fn aggregate_bitmask(pubkeys: &[Vec<u8>], bitmask: &[bool]) -> Result<[u8; 48], ConformanceError> {
    if pubkeys.len() != bitmask.len() {
        return Err(ConformanceError::InvalidInput(format!(
            "{} public keys but {} bitmask entries",
            pubkeys.len(),
            bitmask.len()
        )));
    }
    let selected = pubkeys
        .iter()
        .zip(bitmask)
        .filter(|(_, bit)| **bit)
        .map(|(pk, _)| decode_pubkey(pk))
        .collect::<Result<Vec<_>, _>>()?;
    if selected.is_empty() {
        return Err(ConformanceError::InvalidInput("no participants".into()));
    }
    let refs: Vec<&PublicKey> = selected.iter().collect();
    let aggregate =
        AggregatePublicKey::aggregate(&refs, true).map_err(|err| bls_error("aggregation", err))?;
    Ok(aggregate.to_public_key().compress())
}

/// Compress an uncompressed G1 point
pub fn compress(uncompressed: &[u8]) -> Result<[u8; 48], ConformanceError> {
    if uncompressed.len() != 96 {
        return Err(ConformanceError::InvalidInput(format!(
            "expected a 96 byte point, got {}",
            uncompressed.len()
        )));
    }
    Ok(decode_pubkey(uncompressed)?.compress())
}

/// Deterministic key pair for vectors
pub fn keypair(seed: u8) -> Result<(SecretKey, PublicKey), ConformanceError> {
    let ikm = [seed; 32];
    let sk = SecretKey::key_gen(&ikm, &[]).map_err(|err| bls_error("key generation", err))?;
    let pk = sk.sk_to_pk();
    Ok((sk, pk))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_matches_serialized_key() {
        let (_, pk) = keypair(1).unwrap();
        assert_eq!(compress(&pk.serialize()).unwrap(), pk.compress());
        assert!(compress(&pk.compress()).is_err());
    }

    #[test]
    fn test_aggregate_respects_bitmask() {
        let keys: Vec<PublicKey> = (1..=3).map(|i| keypair(i).unwrap().1).collect();
        let encoded: Vec<Vec<u8>> = keys.iter().map(|pk| pk.compress().to_vec()).collect();

        let single = aggregate_bitmask(&encoded, &[false, true, false]).unwrap();
        assert_eq!(single, keys[1].compress());

        let pair = aggregate_bitmask(&encoded, &[true, false, true]).unwrap();
        let expected = AggregatePublicKey::aggregate(&[&keys[0], &keys[2]], false)
            .unwrap()
            .to_public_key()
            .compress();
        assert_eq!(pair, expected);
        assert_ne!(pair, aggregate_bitmask(&encoded, &[true, true, true]).unwrap());

        assert!(aggregate_bitmask(&encoded, &[false, false, false]).is_err());
        assert!(aggregate_bitmask(&encoded, &[true, true]).is_err());
    }

    #[test]
    fn test_rejects_invalid_point() {
        let mut bytes = keypair(4).unwrap().1.serialize();
        bytes[95] ^= 1;
        assert!(compress(&bytes).is_err());
    }
}
