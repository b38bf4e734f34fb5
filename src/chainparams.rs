//! Per-chain consensus and address constants for mainnet, testnet and
//! regtest, plus the hard-coded checkpoint tables used for SPV bootstrap.

use serde::{Deserialize, Serialize};

use crate::base58::base58check_decode;
use crate::error::ParseError;
use crate::uint256::Uint256;
use crate::Hash256;

/// A hard-coded `{height, hash, timestamp}` bootstrap point.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    pub height: u32,
    pub hash: &'static str,
    pub timestamp: u32,
}

/// Compile-time parameter set for one chain.
#[derive(Debug)]
pub struct ChainParams {
    pub name: &'static str,
    pub pubkey_prefix: u8,
    pub script_prefix: u8,
    pub secret_prefix: u8,
    pub bech32_hrp: &'static str,
    pub bip32_privkey: u32,
    pub bip32_pubkey: u32,
    pub netmagic: [u8; 4],
    pub genesis_hash: &'static str,
    pub default_port: u16,
    pub dns_seeds: &'static [&'static str],
    /// Enforce the chain id embedded in header versions.
    pub strict_id: bool,
    /// Headers may carry merge-mining proofs.
    pub auxpow_id: bool,
    pub aux_chain_id: i32,
    pub pow_limit_bits: u32,
    pub minimum_chainwork: &'static str,
    pub checkpoints: &'static [Checkpoint],
}

impl ChainParams {
    pub fn pow_limit(&self) -> Uint256 {
        let (limit, _, _) = Uint256::from_compact(self.pow_limit_bits);
        limit
    }

    pub fn min_chainwork(&self) -> Uint256 {
        Uint256::from_hex(self.minimum_chainwork).unwrap_or(Uint256::ZERO)
    }

    pub fn genesis(&self) -> Hash256 {
        hash_from_hex(self.genesis_hash)
    }
}

/// Parse a display-order hex block hash into internal byte order.
pub fn hash_from_hex(s: &str) -> Hash256 {
    Uint256::from_hex(s).map(|u| u.to_le_bytes()).unwrap_or([0u8; 32])
}

pub static MAINNET: ChainParams = ChainParams {
    name: "main",
    pubkey_prefix: 0x1e,
    script_prefix: 0x16,
    secret_prefix: 0x9e,
    bech32_hrp: "doge",
    bip32_privkey: 0x02fac398,
    bip32_pubkey: 0x02facafd,
    netmagic: [0xc0, 0xc0, 0xc0, 0xc0],
    genesis_hash: "1a91e3dace36e2be3bf030a65679fe821aa1d6ef92e7c9902eb318182c355691",
    default_port: 22556,
    dns_seeds: &["seed.multidoge.org", "seed2.multidoge.org"],
    strict_id: true,
    auxpow_id: true,
    aux_chain_id: 0x0062,
    pow_limit_bits: 0x1e0fffff,
    minimum_chainwork: "0000000000000000000000000000000000000000000000400000000000000000",
    checkpoints: &[
        Checkpoint {
            height: 0,
            hash: "1a91e3dace36e2be3bf030a65679fe821aa1d6ef92e7c9902eb318182c355691",
            timestamp: 1_386_325_540,
        },
        Checkpoint {
            height: 104_679,
            hash: "35eb87ae90d44b98898fec8c39577b76cb1eb08e1261cfc10706c8ce9a1d01cf",
            timestamp: 1_392_637_497,
        },
        Checkpoint {
            height: 145_000,
            hash: "cc47cae70d7c5c92828d3214a266331dde59087d4a39071fa76ddfff9b7bde72",
            timestamp: 1_395_094_679,
        },
        Checkpoint {
            height: 371_337,
            hash: "60323982f9c5ff1b5a954eac9dc1269352835f47c2c5222691d80f0d50dcf053",
            timestamp: 1_410_464_445,
        },
    ],
};

pub static TESTNET: ChainParams = ChainParams {
    name: "test",
    pubkey_prefix: 0x71,
    script_prefix: 0xc4,
    secret_prefix: 0xf1,
    bech32_hrp: "tdge",
    bip32_privkey: 0x04358394,
    bip32_pubkey: 0x043587cf,
    netmagic: [0xfc, 0xc1, 0xb7, 0xdc],
    genesis_hash: "bb0a78264637406b6360aad926284d544d7049f45189db5664f3c4d07350559e",
    default_port: 44556,
    dns_seeds: &["testseed.jrn.me.uk"],
    strict_id: false,
    auxpow_id: true,
    aux_chain_id: 0x0062,
    pow_limit_bits: 0x1e0fffff,
    minimum_chainwork: "0000000000000000000000000000000000000000000000000000000100000000",
    checkpoints: &[Checkpoint {
        height: 0,
        hash: "bb0a78264637406b6360aad926284d544d7049f45189db5664f3c4d07350559e",
        timestamp: 1_391_503_289,
    }],
};

pub static REGTEST: ChainParams = ChainParams {
    name: "regtest",
    pubkey_prefix: 0x6f,
    script_prefix: 0xc4,
    secret_prefix: 0xef,
    bech32_hrp: "dcrt",
    bip32_privkey: 0x04358394,
    bip32_pubkey: 0x043587cf,
    netmagic: [0xfa, 0xbf, 0xb5, 0xda],
    genesis_hash: "3d2160a3b5dc4a9d62e7e66a295f70313ac808440ef7400d6c0772171ce973a5",
    default_port: 18444,
    dns_seeds: &[],
    strict_id: false,
    auxpow_id: true,
    aux_chain_id: 0x0062,
    pow_limit_bits: 0x207fffff,
    minimum_chainwork: "0000000000000000000000000000000000000000000000000000000000000002",
    checkpoints: &[Checkpoint {
        height: 0,
        hash: "3d2160a3b5dc4a9d62e7e66a295f70313ac808440ef7400d6c0772171ce973a5",
        timestamp: 1_296_688_602,
    }],
};

/// Which chain a client runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Main,
    Test,
    Regtest,
}

impl ChainKind {
    pub fn params(self) -> &'static ChainParams {
        match self {
            ChainKind::Main => &MAINNET,
            ChainKind::Test => &TESTNET,
            ChainKind::Regtest => &REGTEST,
        }
    }
}

/// Identify the chain an address belongs to from its Base58Check prefix
/// byte. Checks pubkey, script and secret prefixes of every known chain.
pub fn chain_from_b58_prefix(address: &str) -> Result<&'static ChainParams, ParseError> {
    let payload = base58check_decode(address)?;
    let prefix = *payload.first().ok_or(ParseError::Truncated)?;
    for params in [&MAINNET, &TESTNET, &REGTEST] {
        if prefix == params.pubkey_prefix
            || prefix == params.script_prefix
            || prefix == params.secret_prefix
        {
            return Ok(params);
        }
    }
    Err(ParseError::UnknownPrefix)
}
