//! Minimal contract ABI encoding
//!
//! The solver only calls a handful of contract functions, so it carries a
//! small word-level encoder instead of generated bindings. Layout follows
//! the standard head/tail scheme: static values inline, dynamic values as a
//! 32-byte offset into the tail.

use anyhow::Result;
use ethereum_types::{H160, H256, U256};
use sha3::{Digest, Keccak256};

/// An encodable ABI value.
#[derive(Debug, Clone)]
pub enum Token {
    Uint(U256),
    Address(H160),
    FixedBytes(H256),
    Bool(bool),
    Bytes(Vec<u8>),
    Tuple(Vec<Token>),
}

/// First four bytes of the keccak of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    let hash = hasher.finalize();
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Full keccak of an event signature (topic0).
pub fn event_topic(signature: &str) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    H256::from_slice(&hasher.finalize())
}

/// Encodes a function call: selector followed by the encoded arguments.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&encode(args));
    out
}

/// Encodes a sequence of values as a top-level argument tuple.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len: usize = tokens.iter().map(head_size).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if is_dynamic(token) {
            push_uint(&mut head, U256::from(head_len + tail.len()));
            tail.extend_from_slice(&encode_dynamic(token));
        } else {
            encode_static(token, &mut head);
        }
    }

    head.extend_from_slice(&tail);
    head
}

fn is_dynamic(token: &Token) -> bool {
    match token {
        Token::Bytes(_) => true,
        Token::Tuple(inner) => inner.iter().any(is_dynamic),
        _ => false,
    }
}

fn head_size(token: &Token) -> usize {
    if is_dynamic(token) {
        32
    } else {
        match token {
            Token::Tuple(inner) => inner.iter().map(head_size).sum(),
            _ => 32,
        }
    }
}

fn encode_static(token: &Token, out: &mut Vec<u8>) {
    match token {
        Token::Uint(v) => push_uint(out, *v),
        Token::Address(a) => {
            out.extend_from_slice(&[0u8; 12]);
            out.extend_from_slice(a.as_bytes());
        }
        Token::FixedBytes(h) => out.extend_from_slice(h.as_bytes()),
        Token::Bool(b) => push_uint(out, U256::from(u8::from(*b))),
        Token::Tuple(inner) => {
            for t in inner {
                encode_static(t, out);
            }
        }
        Token::Bytes(_) => unreachable!("bytes are always dynamic"),
    }
}

fn encode_dynamic(token: &Token) -> Vec<u8> {
    match token {
        Token::Bytes(data) => {
            let mut out = Vec::new();
            push_uint(&mut out, U256::from(data.len()));
            out.extend_from_slice(data);
            let rem = data.len() % 32;
            if rem != 0 {
                out.extend_from_slice(&vec![0u8; 32 - rem]);
            }
            out
        }
        Token::Tuple(inner) => encode(inner),
        _ => unreachable!("static tokens are encoded inline"),
    }
}

fn push_uint(out: &mut Vec<u8>, value: U256) {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    out.extend_from_slice(&buf);
}

/// Decodes the word at `index` of contract return data as a `U256`.
pub fn decode_u256(data: &[u8], index: usize) -> Result<U256> {
    let start = index * 32;
    let end = start + 32;
    if data.len() < end {
        anyhow::bail!(
            "return data too short: wanted word {} of {} bytes",
            index,
            data.len()
        );
    }
    Ok(U256::from_big_endian(&data[start..end]))
}

/// Decodes the word at `index` of contract return data as a bool.
pub fn decode_bool(data: &[u8], index: usize) -> Result<bool> {
    Ok(!decode_u256(data, index)?.is_zero())
}
