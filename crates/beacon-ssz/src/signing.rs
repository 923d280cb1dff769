//! Signing domains and signing roots.

use crate::hash::hash_two;
use crate::{Root, Version};

/// Domain type of sync committee signatures
pub const DOMAIN_SYNC_COMMITTEE: [u8; 4] = [0x07, 0x00, 0x00, 0x00];

/// Root of the `ForkData { current_version, genesis_validators_root }` container
pub fn compute_fork_data_root(fork_version: &Version, genesis_validators_root: &Root) -> Root {
    let mut version_leaf = [0u8; 32];
    version_leaf[..4].copy_from_slice(fork_version);
    hash_two(&version_leaf, genesis_validators_root)
}

/// `domain = domain_type || fork_data_root[..28]`
pub fn compute_domain(
    domain_type: &[u8; 4],
    fork_version: &Version,
    genesis_validators_root: &Root,
) -> Root {
    let fork_data_root = compute_fork_data_root(fork_version, genesis_validators_root);
    let mut domain = [0u8; 32];
    domain[..4].copy_from_slice(domain_type);
    domain[4..].copy_from_slice(&fork_data_root[..28]);
    domain
}

/// Root of the `SigningData { object_root, domain }` container
pub fn compute_signing_root(object_root: &Root, domain: &Root) -> Root {
    hash_two(object_root, domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode_hex_array;

    #[test]
    fn test_domain_layout() {
        let gvr = [0x4b; 32];
        let domain = compute_domain(&DOMAIN_SYNC_COMMITTEE, &[3, 0, 0, 0], &gvr);
        assert_eq!(&domain[..4], &DOMAIN_SYNC_COMMITTEE);
        let fork_data_root = compute_fork_data_root(&[3, 0, 0, 0], &gvr);
        assert_eq!(&domain[4..], &fork_data_root[..28]);
    }

    #[test]
    fn test_domain_separates_forks() {
        let gvr = [0x4b; 32];
        assert_ne!(
            compute_domain(&DOMAIN_SYNC_COMMITTEE, &[3, 0, 0, 0], &gvr),
            compute_domain(&DOMAIN_SYNC_COMMITTEE, &[4, 0, 0, 0], &gvr)
        );
    }

    #[test]
    fn test_signing_root_binds_domain() {
        let header_root = [5u8; 32];
        assert_ne!(
            compute_signing_root(&header_root, &[1u8; 32]),
            compute_signing_root(&header_root, &[2u8; 32])
        );
    }

    #[test]
    fn test_mainnet_fork_digests() {
        let gvr: Root = decode_hex_array("0x4b363db94e286120d76eb905340fdd4e54bfe9f06bf33ff6cf5ad27f511bfe95").unwrap();
        let digests = [
            ([0, 0, 0, 0], "b5303f2a"),
            ([1, 0, 0, 0], "afcaaba0"),
            ([2, 0, 0, 0], "4a26c58b"),
            ([3, 0, 0, 0], "bba4da96"),
            ([4, 0, 0, 0], "6a95a1a9"),
        ];
        for (version, digest) in digests {
            assert_eq!(hex::encode(&compute_fork_data_root(&version, &gvr)[..4]), digest);
            let domain = compute_domain(&DOMAIN_SYNC_COMMITTEE, &version, &gvr);
            assert_eq!(hex::encode(&domain[4..8]), digest);
        }
    }

    #[test]
    fn test_signing_root_is_sha256_of_pair() {
        use sha2::{Digest, Sha256};
        let header_root = [5u8; 32];
        let domain = [7u8; 32];
        let expected: [u8; 32] = Sha256::new()
            .chain_update(header_root)
            .chain_update(domain)
            .finalize()
            .into();
        assert_eq!(compute_signing_root(&header_root, &domain), expected);
    }
}
