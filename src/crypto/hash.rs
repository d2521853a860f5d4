//! Claim hash derivation
//!
//! Structured-hash scheme matching the on-chain verifier: the mandate tuple
//! is hashed under its typehash into a witness hash, which is appended to
//! the compact tuple and hashed under the compact typehash. Encoding is the
//! standard 32-byte-word layout (addresses left-padded, integers big-endian).
//! Any drift from the on-chain encoding makes every signature check fail, so
//! the typestrings below must stay byte-identical to the contract's.

use ethereum_types::{H160, H256, U256};
use sha3::{Digest, Keccak256};

use crate::intent::{Compact, Mandate};

/// Canonical mandate typestring.
pub const MANDATE_TYPESTRING: &str = "Mandate(uint256 chainId,address tribunal,address recipient,uint256 expires,address token,uint256 minimumAmount,uint256 baselinePriorityFee,uint256 scalingFactor,bytes32 salt)";

/// Canonical compact typestring (nested struct typestring appended, per the
/// typed-data encoding rules).
pub const COMPACT_TYPESTRING: &str = "Compact(address arbiter,address sponsor,uint256 nonce,uint256 expires,uint256 id,uint256 amount,Mandate mandate)Mandate(uint256 chainId,address tribunal,address recipient,uint256 expires,address token,uint256 minimumAmount,uint256 baselinePriorityFee,uint256 scalingFactor,bytes32 salt)";

/// Keccak-256 convenience wrapper.
pub fn keccak256(data: &[u8]) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    H256::from_slice(&hasher.finalize())
}

/// Typehash of the mandate struct.
pub fn mandate_typehash() -> H256 {
    keccak256(MANDATE_TYPESTRING.as_bytes())
}

/// Typehash of the compact struct. Also the typehash used for on-chain
/// registration lookups.
pub fn compact_typehash() -> H256 {
    keccak256(COMPACT_TYPESTRING.as_bytes())
}

/// A 32-byte encoding word.
enum Word {
    Uint(U256),
    Addr(H160),
    Fixed(H256),
}

fn encode_words(words: &[Word]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * 32);
    for word in words {
        match word {
            Word::Uint(v) => {
                let mut buf = [0u8; 32];
                v.to_big_endian(&mut buf);
                out.extend_from_slice(&buf);
            }
            Word::Addr(a) => {
                out.extend_from_slice(&[0u8; 12]);
                out.extend_from_slice(a.as_bytes());
            }
            Word::Fixed(h) => out.extend_from_slice(h.as_bytes()),
        }
    }
    out
}

/// Hashes the mandate tuple into the witness hash.
pub fn derive_witness_hash(mandate: &Mandate) -> H256 {
    let encoded = encode_words(&[
        Word::Fixed(mandate_typehash()),
        Word::Uint(U256::from(mandate.chain_id)),
        Word::Addr(mandate.tribunal),
        Word::Addr(mandate.recipient),
        Word::Uint(mandate.expires),
        Word::Addr(mandate.token),
        Word::Uint(mandate.minimum_amount),
        Word::Uint(mandate.baseline_priority_fee),
        Word::Uint(mandate.scaling_factor),
        Word::Fixed(mandate.salt),
    ]);
    keccak256(&encoded)
}

/// Derives the canonical claim hash for a compact message.
///
/// Identical field values always produce an identical hash; this is the
/// digest that sponsor and allocator signatures commit to.
pub fn derive_claim_hash(compact: &Compact) -> H256 {
    let witness = derive_witness_hash(&compact.mandate);
    let encoded = encode_words(&[
        Word::Fixed(compact_typehash()),
        Word::Addr(compact.arbiter),
        Word::Addr(compact.sponsor),
        Word::Uint(compact.nonce),
        Word::Uint(compact.expires),
        Word::Uint(compact.id),
        Word::Uint(compact.amount),
        Word::Fixed(witness),
    ]);
    keccak256(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typehashes_match_onchain_constants() {
        assert_eq!(
            format!("{:x}", compact_typehash()),
            "27f09e0bb8ce2ae63380578af7af85055d3ada248c502e2378b85bc3d05ee0b0"
        );
        assert_eq!(
            format!("{:x}", mandate_typehash()),
            "52c75464356e20084ae43acac75087fbf0e0c678e7ffa326f369f37e88696036"
        );
    }

    #[test]
    fn keccak_empty_input() {
        assert_eq!(
            format!("{:x}", keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
