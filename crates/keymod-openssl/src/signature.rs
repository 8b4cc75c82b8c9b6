//! Key signatures: an OpenPGP v4 style fingerprint of the RSA public key.

use keymod_core::{KeymodError, KeymodResult, KeySignature};
use openssl::bn::BigNumRef;
use openssl::pkey::HasPublic;
use openssl::rsa::RsaRef;
use openssl::sha::sha1;

const PACKET_TAG: u8 = 0x99;
const PACKET_VERSION: u8 = 0x04;
const ALGO_RSA_ENCRYPT: u8 = 0x02;

/// Hash the public half of `key` into a [`KeySignature`].
pub fn fingerprint<T: HasPublic>(key: &RsaRef<T>) -> KeymodResult<KeySignature> {
    let packet = fingerprint_packet(key.n(), key.e())?;
    Ok(KeySignature::from_digest(&sha1(&packet)))
}

/// Byte sequence the fingerprint hashes.
///
/// `0x99`, u16 body length, version 4, a zero timestamp, algorithm 2, then the
/// modulus and exponent as big-endian MPIs (u16 bit count + magnitude bytes).
pub fn fingerprint_packet(n: &BigNumRef, e: &BigNumRef) -> KeymodResult<Vec<u8>> {
    let n_bytes = n.to_vec();
    let e_bytes = e.to_vec();
    let body_len = 10 + n_bytes.len() + e_bytes.len();
    let body_len = u16::try_from(body_len).map_err(|_| {
        KeymodError::Configuration(format!(
            "public key too large to fingerprint ({body_len} bytes)"
        ))
    })?;

    let mut packet = Vec::with_capacity(3 + usize::from(body_len));
    packet.push(PACKET_TAG);
    packet.extend_from_slice(&body_len.to_be_bytes());
    packet.push(PACKET_VERSION);
    packet.extend_from_slice(&[0; 4]);
    packet.push(ALGO_RSA_ENCRYPT);
    put_mpi(&mut packet, n.num_bits(), &n_bytes);
    put_mpi(&mut packet, e.num_bits(), &e_bytes);
    Ok(packet)
}

fn put_mpi(out: &mut Vec<u8>, bits: i32, magnitude: &[u8]) {
    let bits = u16::try_from(bits).unwrap_or(u16::MAX);
    out.extend_from_slice(&bits.to_be_bytes());
    out.extend_from_slice(magnitude);
}
