//! Followed network configuration.

use beacon_ssz::{compute_domain, Root, Version, DOMAIN_SYNC_COMMITTEE, SLOTS_PER_EPOCH, SLOTS_PER_SYNC_COMMITTEE_PERIOD};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Network {
    Mainnet,
    Prater,
    Sepolia,
}

/// Fork activation: from `epoch` on, signatures use `version`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fork {
    pub epoch: u64,
    pub version: Version,
}

/// Constants of a followed network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub network: Network,
    pub genesis_validators_root: Root,
    /// Sorted by activation epoch, first entry at genesis
    pub forks: &'static [Fork],
    pub slots_per_period: u64,
    pub committee_size: usize,
    /// Slot the relay starts from when it has no persisted cursor
    pub checkpoint_slot: u64,
}

const fn hex_digit(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex digit"),
    }
}

/// Decode a 0x-prefixed 32-byte hex constant at compile time
const fn root(hex: &str) -> Root {
    let bytes = hex.as_bytes();
    assert!(bytes.len() == 66 && bytes[0] == b'0' && bytes[1] == b'x');
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        out[i] = hex_digit(bytes[2 + 2 * i]) << 4 | hex_digit(bytes[3 + 2 * i]);
        i += 1;
    }
    out
}

const MAINNET_GVR: Root = root("0x4b363db94e286120d76eb905340fdd4e54bfe9f06bf33ff6cf5ad27f511bfe95");
const PRATER_GVR: Root = root("0x043db0d9a83813551ee2f33450d23797757d430911a9320530ad8a0eabc43efb");
const SEPOLIA_GVR: Root = root("0xd8ea171f3c94aea21ebc42a1ed61052acf3f9209c00e4efbaaddac09ed9b8078");

const MAINNET_FORKS: &[Fork] = &[
    Fork { epoch: 0, version: [0x00, 0x00, 0x00, 0x00] },
    Fork { epoch: 74240, version: [0x01, 0x00, 0x00, 0x00] },
    Fork { epoch: 144896, version: [0x02, 0x00, 0x00, 0x00] },
    Fork { epoch: 194048, version: [0x03, 0x00, 0x00, 0x00] },
    Fork { epoch: 269568, version: [0x04, 0x00, 0x00, 0x00] },
    Fork { epoch: 364032, version: [0x05, 0x00, 0x00, 0x00] },
];

const PRATER_FORKS: &[Fork] = &[
    Fork { epoch: 0, version: [0x00, 0x00, 0x10, 0x20] },
    Fork { epoch: 36660, version: [0x01, 0x00, 0x10, 0x20] },
    Fork { epoch: 112260, version: [0x02, 0x00, 0x10, 0x20] },
    Fork { epoch: 162304, version: [0x03, 0x00, 0x10, 0x20] },
    Fork { epoch: 231680, version: [0x04, 0x00, 0x10, 0x20] },
];

const SEPOLIA_FORKS: &[Fork] = &[
    Fork { epoch: 0, version: [0x90, 0x00, 0x00, 0x69] },
    Fork { epoch: 50, version: [0x90, 0x00, 0x00, 0x70] },
    Fork { epoch: 100, version: [0x90, 0x00, 0x00, 0x71] },
    Fork { epoch: 56832, version: [0x90, 0x00, 0x00, 0x72] },
    Fork { epoch: 132608, version: [0x90, 0x00, 0x00, 0x73] },
    Fork { epoch: 222464, version: [0x90, 0x00, 0x00, 0x74] },
];

impl Network {
    pub fn config(&self) -> NetworkConfig {
        let (genesis_validators_root, forks, checkpoint_slot) = match self {
            Network::Mainnet => (MAINNET_GVR, MAINNET_FORKS, 194048 * SLOTS_PER_EPOCH),
            Network::Prater => (PRATER_GVR, PRATER_FORKS, 5601823),
            Network::Sepolia => (SEPOLIA_GVR, SEPOLIA_FORKS, 56832 * SLOTS_PER_EPOCH),
        };
        NetworkConfig {
            network: *self,
            genesis_validators_root,
            forks,
            slots_per_period: SLOTS_PER_SYNC_COMMITTEE_PERIOD,
            committee_size: beacon_ssz::SYNC_COMMITTEE_SIZE,
            checkpoint_slot,
        }
    }
}

impl NetworkConfig {
    pub fn fork_version_at(&self, slot: u64) -> Version {
        let epoch = slot / SLOTS_PER_EPOCH;
        self.forks
            .iter()
            .take_while(|fork| fork.epoch <= epoch)
            .last()
            .map(|fork| fork.version)
            .unwrap_or_default()
    }

    /// Sync committee signing domain for a signature made at `slot`
    pub fn domain_at(&self, slot: u64) -> Root {
        compute_domain(
            &DOMAIN_SYNC_COMMITTEE,
            &self.fork_version_at(slot),
            &self.genesis_validators_root,
        )
    }

    pub fn period_of(&self, slot: u64) -> u64 {
        slot / self.slots_per_period
    }
}
