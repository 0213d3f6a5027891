//! The four-step DH key exchange that bootstraps an encrypted session.
//!
//! The steps are sans-IO: each consumes the previous opaque state plus the
//! server's response body and yields the next request body. [`negotiate`]
//! drives them over a plaintext-envelope connection.
//!
//! ```text
//! let (req, s1) = step1();
//! // send req, receive resp
//! let (req, s2) = step2(s1, &resp)?;
//! // send req, receive resp
//! let (req, s3) = step3(s2, &resp)?;
//! // send req, receive resp
//! let done = finish(s3, &resp)?;
//! // done.auth_key is ready
//! ```
//!
//! Randomness is injected into the `do_*` variants so the steps stay
//! deterministic under test.

use std::fmt;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use num_bigint::BigUint;

use relay_crypto::{aes, dh_answer_key, factorize, prime, random_bytes, rsa, AuthKey};
use relay_crypto::sha1;
use relay_wire::{Reader, WireError, Writer};

use crate::envelope::{pack_plain, unpack_plain, EnvelopeError};
use crate::message::MsgIdGen;
use crate::transport;

// ── Constructor ids ───────────────────────────────────────────────────────────

const REQ_PQ_MULTI: u32 = 0xbe7e8ef1;
const RES_PQ: u32 = 0x05162463;
const PQ_INNER_DATA: u32 = 0x83c95aec;
const REQ_DH_PARAMS: u32 = 0xd712e4be;
const SERVER_DH_PARAMS_OK: u32 = 0xd0e8075c;
const SERVER_DH_PARAMS_FAIL: u32 = 0x79cb045d;
const SERVER_DH_INNER_DATA: u32 = 0xb5890dba;
const CLIENT_DH_INNER_DATA: u32 = 0x6643b654;
const SET_CLIENT_DH_PARAMS: u32 = 0xf5045f1f;
const DH_GEN_OK: u32 = 0x3bcbf734;
const DH_GEN_RETRY: u32 = 0x46dc1fb9;
const DH_GEN_FAIL: u32 = 0xa69dae02;

/// Required modulus width.
const DH_PRIME_BITS: u64 = 2048;
/// Rounds of Miller–Rabin for unrecognized moduli.
const PRIME_CHECK_ROUNDS: usize = 10;

/// The 2048-bit safe prime servers are known to use. Anything else must pass
/// the full primality check.
const KNOWN_DH_PRIME_HEX: &str = "\
c71caeb9c6b1c9048e6c522f70f13f73980d40238e3e21c14934d037563d930f\
48198a0aa7c14058229493d22530f4dbfa336f6e0ac925139543aed44cce7c37\
20fd51f69458705ac68cd4fe6b6b13abdc9746512969328454f18faf8c595f64\
2477fe96bb2a941d5bcd1d4ac8cc49880708fa9b378e3c4f3a9060bee67cf9a4\
a4a695811051907e162753b56b0f6b410dba74d8a84b2a14b3144e0ef1284754\
fd17ed950d5965b4b9dd46582db1178d169c6bc465b0d6ff9ca3928fef5b9ae4\
e418fc15e83ebea0f87fa9ff5eed70050ded2849f47bf959d956850ce929851f\
0d8115f635b105ee2e4e15d04b2454bf6f4fadf034b10403119cd8e3b92fcc5b";

// ── Error ─────────────────────────────────────────────────────────────────────

/// Errors that can occur during the key exchange.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    InvalidNonce { got: [u8; 16], expected: [u8; 16] },
    InvalidServerNonce { got: [u8; 16], expected: [u8; 16] },
    InvalidPqSize { size: usize },
    UnknownFingerprints { fingerprints: Vec<i64> },
    DhParamsFail,
    EncryptedAnswerMisaligned { len: usize },
    Malformed(WireError),
    InvalidAnswerHash,
    InvalidDhPrime { bits: u64 },
    UntrustedDhPrime,
    GOutOfRange,
    DhGenRetry,
    DhGenFail,
    InvalidNewNonceHash { got: [u8; 16], expected: [u8; 16] },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNonce { got, expected } => {
                write!(f, "nonce mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InvalidServerNonce { got, expected } => {
                write!(f, "server_nonce mismatch: got {got:?}, expected {expected:?}")
            }
            Self::InvalidPqSize { size } => write!(f, "pq has {size} bytes, expected 8"),
            Self::UnknownFingerprints { fingerprints } => {
                write!(f, "no known RSA key among {fingerprints:?}")
            }
            Self::DhParamsFail => write!(f, "server rejected the DH parameters"),
            Self::EncryptedAnswerMisaligned { len } => {
                write!(f, "encrypted answer of {len} bytes is not block-aligned")
            }
            Self::Malformed(e) => write!(f, "malformed handshake payload: {e}"),
            Self::InvalidAnswerHash => write!(f, "answer hash mismatch"),
            Self::InvalidDhPrime { bits } => write!(f, "dh_prime has {bits} bits, expected 2048"),
            Self::UntrustedDhPrime => write!(f, "dh_prime failed the safe-prime check"),
            Self::GOutOfRange => write!(f, "DH parameter out of the safe range"),
            Self::DhGenRetry => write!(f, "server requested a DH retry"),
            Self::DhGenFail => write!(f, "server reported DH failure"),
            Self::InvalidNewNonceHash { got, expected } => {
                write!(f, "new_nonce_hash mismatch: got {got:?}, expected {expected:?}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        Self::Malformed(e)
    }
}

// ── Step state ────────────────────────────────────────────────────────────────

/// State after sending `req_pq_multi`.
pub struct Step1 {
    nonce: [u8; 16],
}

/// State after sending `req_DH_params`.
pub struct Step2 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
}

/// State after sending `set_client_DH_params`.
pub struct Step3 {
    nonce: [u8; 16],
    server_nonce: [u8; 16],
    new_nonce: [u8; 32],
    g_ab: BigUint,
    time_offset: i32,
}

/// Output of a completed key exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    /// The 256-byte authorization key.
    pub auth_key: [u8; 256],
    /// Server clock skew in seconds.
    pub time_offset: i32,
    /// The first server salt, derived from the nonces.
    pub first_salt: i64,
}

// ── Steps ─────────────────────────────────────────────────────────────────────

/// Build the `req_pq_multi` request.
pub fn step1() -> (Vec<u8>, Step1) {
    let mut nonce = [0u8; 16];
    random_bytes(&mut nonce);
    do_step1(&nonce)
}

fn do_step1(nonce: &[u8; 16]) -> (Vec<u8>, Step1) {
    let mut w = Writer::with_capacity(20);
    w.u32(REQ_PQ_MULTI);
    w.raw(nonce);
    (w.into_bytes(), Step1 { nonce: *nonce })
}

/// Consume `resPQ` and build `req_DH_params`.
pub fn step2(state: Step1, response: &[u8]) -> Result<(Vec<u8>, Step2), Error> {
    let mut random = [0u8; 256];
    random_bytes(&mut random);
    do_step2(state, response, &random)
}

fn do_step2(state: Step1, response: &[u8], random: &[u8; 256]) -> Result<(Vec<u8>, Step2), Error> {
    let Step1 { nonce } = state;

    let mut r = Reader::new(response);
    r.expect(RES_PQ);
    let got_nonce: [u8; 16] = r.array();
    let server_nonce: [u8; 16] = r.array();
    let pq_bytes = r.bytes();
    let fingerprints = r.vec_i64();
    if let Some(e) = r.error() {
        return Err(e.clone().into());
    }

    check_nonce(&got_nonce, &nonce)?;
    if pq_bytes.len() != 8 {
        return Err(Error::InvalidPqSize { size: pq_bytes.len() });
    }
    let pq = u64::from_be_bytes(pq_bytes.as_slice().try_into().unwrap());
    let (p, q) = factorize(pq);
    let p_bytes = trim_be(p);
    let q_bytes = trim_be(q);

    let mut new_nonce = [0u8; 32];
    new_nonce.copy_from_slice(&random[..32]);

    let mut inner = Writer::with_capacity(100);
    inner.u32(PQ_INNER_DATA);
    inner.bytes(&pq.to_be_bytes());
    inner.bytes(&p_bytes);
    inner.bytes(&q_bytes);
    inner.raw(&nonce);
    inner.raw(&server_nonce);
    inner.raw(&new_nonce);

    let (fingerprint, key) = rsa::find_key(&fingerprints)
        .ok_or(Error::UnknownFingerprints { fingerprints })?;
    let encrypted = rsa::encrypt_raw(inner.as_ref(), &key, &random[32..]);

    let mut req = Writer::with_capacity(320);
    req.u32(REQ_DH_PARAMS);
    req.raw(&nonce);
    req.raw(&server_nonce);
    req.bytes(&p_bytes);
    req.bytes(&q_bytes);
    req.i64(fingerprint);
    req.bytes(&encrypted);

    Ok((req.into_bytes(), Step2 { nonce, server_nonce, new_nonce }))
}

/// Consume `server_DH_params_*` and build `set_client_DH_params`.
pub fn step3(state: Step2, response: &[u8]) -> Result<(Vec<u8>, Step3), Error> {
    let mut random = [0u8; 272];
    random_bytes(&mut random);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i32;
    do_step3(state, response, &random, now)
}

fn do_step3(
    state: Step2,
    response: &[u8],
    random: &[u8; 272],
    now: i32,
) -> Result<(Vec<u8>, Step3), Error> {
    let Step2 { nonce, server_nonce, new_nonce } = state;

    let mut r = Reader::new(response);
    match r.u32() {
        SERVER_DH_PARAMS_FAIL => {
            let got_nonce: [u8; 16] = r.array();
            let got_server: [u8; 16] = r.array();
            let got_hash: [u8; 16] = r.array();
            if let Some(e) = r.error() {
                return Err(e.clone().into());
            }
            check_nonce(&got_nonce, &nonce)?;
            check_server_nonce(&got_server, &server_nonce)?;
            let digest = sha1!(&new_nonce);
            let expected: [u8; 16] = digest[4..].try_into().unwrap();
            check_new_nonce_hash(&got_hash, &expected)?;
            return Err(Error::DhParamsFail);
        }
        SERVER_DH_PARAMS_OK => {}
        got => {
            return Err(WireError::WrongConstructor { expected: SERVER_DH_PARAMS_OK, got }.into())
        }
    }

    let got_nonce: [u8; 16] = r.array();
    let got_server: [u8; 16] = r.array();
    let mut answer = r.bytes();
    if let Some(e) = r.error() {
        return Err(e.clone().into());
    }
    check_nonce(&got_nonce, &nonce)?;
    check_server_nonce(&got_server, &server_nonce)?;
    if answer.len() % 16 != 0 || answer.len() < 20 {
        return Err(Error::EncryptedAnswerMisaligned { len: answer.len() });
    }

    let (key, iv) = dh_answer_key(&server_nonce, &new_nonce);
    aes::ige_decrypt(&mut answer, &key, &iv);

    let got_hash: [u8; 20] = answer[..20].try_into().unwrap();
    let mut inner = Reader::new(&answer[20..]);
    inner.expect(SERVER_DH_INNER_DATA);
    let inner_nonce: [u8; 16] = inner.array();
    let inner_server: [u8; 16] = inner.array();
    let g = inner.i32();
    let dh_prime_bytes = inner.big_bytes();
    let g_a_bytes = inner.big_bytes();
    let server_time = inner.i32();
    let consumed = inner.pos();
    if let Some(e) = inner.error() {
        return Err(e.clone().into());
    }

    if sha1!(&answer[20..20 + consumed]) != got_hash {
        return Err(Error::InvalidAnswerHash);
    }
    check_nonce(&inner_nonce, &nonce)?;
    check_server_nonce(&inner_server, &server_nonce)?;

    let dh_prime = BigUint::from_bytes_be(&dh_prime_bytes);
    let g = BigUint::from(g as u32);
    let g_a = BigUint::from_bytes_be(&g_a_bytes);
    validate_dh_prime(&dh_prime)?;

    let b = BigUint::from_bytes_be(&random[..256]);
    let g_b = g.modpow(&b, &dh_prime);
    let g_ab = g_a.modpow(&b, &dh_prime);

    let one = BigUint::from(1u32);
    check_in_range(&g, &one, &(&dh_prime - &one))?;
    check_in_range(&g_a, &one, &(&dh_prime - &one))?;
    check_in_range(&g_b, &one, &(&dh_prime - &one))?;
    // Both public values must stay 2^64 away from the edges.
    let margin = &one << (DH_PRIME_BITS as usize - 64);
    check_in_range(&g_a, &margin, &(&dh_prime - &margin))?;
    check_in_range(&g_b, &margin, &(&dh_prime - &margin))?;

    let mut inner = Writer::with_capacity(300);
    inner.u32(CLIENT_DH_INNER_DATA);
    inner.raw(&nonce);
    inner.raw(&server_nonce);
    inner.i64(0); // retry_id
    inner.bytes(&g_b.to_bytes_be());
    let inner = inner.into_bytes();

    let mut data = Vec::with_capacity(20 + inner.len() + 16);
    data.extend_from_slice(&sha1!(&inner));
    data.extend_from_slice(&inner);
    let pad = (16 - data.len() % 16) % 16;
    data.extend_from_slice(&random[256..256 + pad]);
    aes::ige_encrypt(&mut data, &key, &iv);

    let mut req = Writer::with_capacity(48 + data.len());
    req.u32(SET_CLIENT_DH_PARAMS);
    req.raw(&nonce);
    req.raw(&server_nonce);
    req.bytes(&data);

    Ok((
        req.into_bytes(),
        Step3 { nonce, server_nonce, new_nonce, g_ab, time_offset: server_time - now },
    ))
}

/// Consume the final `dh_gen_*` answer.
pub fn finish(state: Step3, response: &[u8]) -> Result<Finished, Error> {
    let Step3 { nonce, server_nonce, new_nonce, g_ab, time_offset } = state;

    let mut r = Reader::new(response);
    let number = match r.u32() {
        DH_GEN_OK => 1u8,
        DH_GEN_RETRY => 2,
        DH_GEN_FAIL => 3,
        got => return Err(WireError::WrongConstructor { expected: DH_GEN_OK, got }.into()),
    };
    let got_nonce: [u8; 16] = r.array();
    let got_server: [u8; 16] = r.array();
    let got_hash: [u8; 16] = r.array();
    if let Some(e) = r.error() {
        return Err(e.clone().into());
    }
    check_nonce(&got_nonce, &nonce)?;
    check_server_nonce(&got_server, &server_nonce)?;

    let mut key_bytes = [0u8; 256];
    let magnitude = g_ab.to_bytes_be();
    key_bytes[256 - magnitude.len()..].copy_from_slice(&magnitude);
    let auth_key = AuthKey::from_bytes(key_bytes);

    let expected = auth_key.new_nonce_hash(&new_nonce, number);
    check_new_nonce_hash(&got_hash, &expected)?;

    match number {
        1 => {
            let mut salt = [0u8; 8];
            for ((dst, a), b) in salt.iter_mut().zip(&new_nonce[..8]).zip(&server_nonce[..8]) {
                *dst = a ^ b;
            }
            Ok(Finished { auth_key: key_bytes, time_offset, first_salt: i64::from_le_bytes(salt) })
        }
        2 => Err(Error::DhGenRetry),
        _ => Err(Error::DhGenFail),
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

/// Errors from [`negotiate`].
#[derive(Debug)]
pub enum NegotiateError {
    /// Socket failure.
    Io(io::Error),
    /// A plaintext frame did not parse.
    Envelope(EnvelopeError),
    /// A handshake step failed.
    Step(Error),
}

impl fmt::Display for NegotiateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Envelope(e) => write!(f, "envelope: {e}"),
            Self::Step(e) => write!(f, "key exchange: {e}"),
        }
    }
}

impl std::error::Error for NegotiateError {}

impl From<io::Error> for NegotiateError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
impl From<EnvelopeError> for NegotiateError {
    fn from(e: EnvelopeError) -> Self {
        Self::Envelope(e)
    }
}
impl From<Error> for NegotiateError {
    fn from(e: Error) -> Self {
        Self::Step(e)
    }
}

/// Run the whole key exchange over an already-framed connection.
///
/// The caller has sent the abridged init marker; `negotiate` exchanges the
/// four plaintext envelopes and returns the [`Finished`] key material.
pub async fn negotiate<S>(stream: &mut S, ids: &mut MsgIdGen) -> Result<Finished, NegotiateError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    async fn roundtrip<S>(stream: &mut S, ids: &mut MsgIdGen, req: &[u8]) -> Result<Vec<u8>, NegotiateError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        transport::write_frame(stream, &pack_plain(ids.next(), req)).await?;
        let frame = transport::read_frame(stream).await?;
        let (_msg_id, body) = unpack_plain(&frame)?;
        Ok(body)
    }

    let (req, s1) = step1();
    let resp = roundtrip(stream, ids, &req).await?;
    let (req, s2) = step2(s1, &resp)?;
    let resp = roundtrip(stream, ids, &req).await?;
    let (req, s3) = step3(s2, &resp)?;
    let resp = roundtrip(stream, ids, &req).await?;
    let done = finish(s3, &resp)?;
    log::debug!("key exchange complete, time offset {}s", done.time_offset);
    Ok(done)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn trim_be(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[skip..].to_vec()
}

fn validate_dh_prime(p: &BigUint) -> Result<(), Error> {
    let bits = p.bits();
    if bits != DH_PRIME_BITS {
        return Err(Error::InvalidDhPrime { bits });
    }
    let known = BigUint::parse_bytes(KNOWN_DH_PRIME_HEX.as_bytes(), 16)
        .expect("known prime constant parses");
    if *p == known {
        return Ok(());
    }
    if !prime::is_safe_prime(p, PRIME_CHECK_ROUNDS) {
        return Err(Error::UntrustedDhPrime);
    }
    Ok(())
}

fn check_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNonce { got: *got, expected: *expected })
    }
}

fn check_server_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidServerNonce { got: *got, expected: *expected })
    }
}

fn check_new_nonce_hash(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::InvalidNewNonceHash { got: *got, expected: *expected })
    }
}

fn check_in_range(value: &BigUint, low: &BigUint, high: &BigUint) -> Result<(), Error> {
    if low < value && value < high {
        Ok(())
    } else {
        Err(Error::GOutOfRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_crypto::Side;

    /// The server's half of the exchange, as far as a test can play it
    /// without the RSA private key: it learns `new_nonce` from the injected
    /// randomness instead of decrypting step 2's payload.
    struct ScriptedServer {
        nonce: [u8; 16],
        server_nonce: [u8; 16],
        new_nonce: [u8; 32],
        prime: BigUint,
        a: BigUint,
        g_a: BigUint,
        auth_key: Option<[u8; 256]>,
    }

    impl ScriptedServer {
        fn new(nonce: [u8; 16], new_nonce: [u8; 32]) -> Self {
            let prime = BigUint::parse_bytes(KNOWN_DH_PRIME_HEX.as_bytes(), 16).unwrap();
            let a = BigUint::from_bytes_be(&[0x42u8; 64]);
            let g_a = BigUint::from(3u32).modpow(&a, &prime);
            Self {
                nonce,
                server_nonce: core::array::from_fn(|i| (0xa0 + i) as u8),
                new_nonce,
                prime,
                a,
                g_a,
                auth_key: None,
            }
        }

        fn res_pq(&self, pq: u64, fingerprint: i64) -> Vec<u8> {
            let mut w = Writer::new();
            w.u32(RES_PQ);
            w.raw(&self.nonce);
            w.raw(&self.server_nonce);
            w.bytes(&pq.to_be_bytes());
            w.vec_i64(&[fingerprint]);
            w.into_bytes()
        }

        fn server_dh_params_ok(&self, server_time: i32) -> Vec<u8> {
            let mut inner = Writer::new();
            inner.u32(SERVER_DH_INNER_DATA);
            inner.raw(&self.nonce);
            inner.raw(&self.server_nonce);
            inner.i32(3);
            inner.bytes(&self.prime.to_bytes_be());
            inner.bytes(&self.g_a.to_bytes_be());
            inner.i32(server_time);
            let inner = inner.into_bytes();

            let mut answer = Vec::new();
            answer.extend_from_slice(&sha1!(&inner));
            answer.extend_from_slice(&inner);
            while answer.len() % 16 != 0 {
                answer.push(0);
            }
            let (key, iv) = dh_answer_key(&self.server_nonce, &self.new_nonce);
            aes::ige_encrypt(&mut answer, &key, &iv);

            let mut w = Writer::new();
            w.u32(SERVER_DH_PARAMS_OK);
            w.raw(&self.nonce);
            w.raw(&self.server_nonce);
            w.bytes(&answer);
            w.into_bytes()
        }

        fn dh_gen_ok(&mut self, set_client_dh_params: &[u8]) -> Vec<u8> {
            let mut r = Reader::new(set_client_dh_params);
            r.expect(SET_CLIENT_DH_PARAMS);
            let _nonce: [u8; 16] = r.array();
            let _server: [u8; 16] = r.array();
            let mut data = r.bytes();
            assert!(r.finish().is_ok());

            let (key, iv) = dh_answer_key(&self.server_nonce, &self.new_nonce);
            aes::ige_decrypt(&mut data, &key, &iv);

            let mut inner = Reader::new(&data[20..]);
            inner.expect(CLIENT_DH_INNER_DATA);
            let _nonce: [u8; 16] = inner.array();
            let _server: [u8; 16] = inner.array();
            let _retry_id = inner.i64();
            let g_b = BigUint::from_bytes_be(&inner.big_bytes());
            let consumed = inner.pos();
            assert!(inner.finish().is_ok());
            assert_eq!(sha1!(&data[20..20 + consumed])[..], data[..20]);

            let g_ab = g_b.modpow(&self.a, &self.prime);
            let mut key_bytes = [0u8; 256];
            let magnitude = g_ab.to_bytes_be();
            key_bytes[256 - magnitude.len()..].copy_from_slice(&magnitude);
            self.auth_key = Some(key_bytes);

            let hash = AuthKey::from_bytes(key_bytes).new_nonce_hash(&self.new_nonce, 1);
            let mut w = Writer::new();
            w.u32(DH_GEN_OK);
            w.raw(&self.nonce);
            w.raw(&self.server_nonce);
            w.raw(&hash);
            w.into_bytes()
        }
    }

    #[test]
    fn full_exchange_against_scripted_server() {
        let nonce = [7u8; 16];
        let mut step2_random = [0u8; 256];
        for (i, b) in step2_random.iter_mut().enumerate() {
            *b = (i * 11 % 256) as u8;
        }
        let new_nonce: [u8; 32] = step2_random[..32].try_into().unwrap();

        let mut server = ScriptedServer::new(nonce, new_nonce);

        let (req1, s1) = do_step1(&nonce);
        assert_eq!(&req1[..4], &REQ_PQ_MULTI.to_le_bytes());

        let fingerprint = rsa::known_keys()[0].fingerprint();
        let resp1 = server.res_pq(1470626929934143021, fingerprint);
        let (req2, s2) = do_step2(s1, &resp1, &step2_random).unwrap();
        // p and q must be in the request, smallest first.
        assert_eq!(&req2[..4], &REQ_DH_PARAMS.to_le_bytes());

        let step3_random = [0x5cu8; 272];
        let now = 1_700_000_000;
        let resp2 = server.server_dh_params_ok(now + 25);
        let (req3, s3) = do_step3(s2, &resp2, &step3_random, now).unwrap();
        assert_eq!(s3.time_offset, 25);

        let resp3 = server.dh_gen_ok(&req3);
        let done = finish(s3, &resp3).unwrap();

        // Both ends must agree on g^{ab} mod p.
        assert_eq!(done.auth_key, server.auth_key.unwrap());
        assert_eq!(done.time_offset, 25);

        let expected_salt = {
            let mut salt = [0u8; 8];
            for ((dst, a), b) in salt.iter_mut().zip(&new_nonce[..8]).zip(&server.server_nonce[..8]) {
                *dst = a ^ b;
            }
            i64::from_le_bytes(salt)
        };
        assert_eq!(done.first_salt, expected_salt);

        // The key survives a roundtrip through the encrypted envelope.
        let auth_key = AuthKey::from_bytes(done.auth_key);
        let frame =
            crate::envelope::pack_encrypted(&auth_key, done.first_salt, 1, 4, 1, b"test", Side::Client);
        let env = crate::envelope::unpack_encrypted(&auth_key, &frame, Side::Client).unwrap();
        assert_eq!(env.body, b"test");
    }

    #[test]
    fn nonce_mismatch_is_fatal() {
        let nonce = [1u8; 16];
        let (_, s1) = do_step1(&nonce);
        let server = ScriptedServer::new([2u8; 16], [0u8; 32]);
        let resp = server.res_pq(15, 1);
        let random = [0u8; 256];
        assert!(matches!(do_step2(s1, &resp, &random), Err(Error::InvalidNonce { .. })));
    }

    #[test]
    fn unknown_fingerprints_are_rejected() {
        let nonce = [1u8; 16];
        let (_, s1) = do_step1(&nonce);
        let server = ScriptedServer::new(nonce, [0u8; 32]);
        let resp = server.res_pq(1470626929934143021, 0x1234);
        let random = [9u8; 256];
        assert!(matches!(
            do_step2(s1, &resp, &random),
            Err(Error::UnknownFingerprints { .. })
        ));
    }

    #[test]
    fn small_prime_is_rejected() {
        assert!(matches!(
            validate_dh_prime(&BigUint::from(0xffff_fffb_u32)),
            Err(Error::InvalidDhPrime { .. })
        ));
    }

    #[test]
    fn known_prime_is_accepted() {
        let p = BigUint::parse_bytes(KNOWN_DH_PRIME_HEX.as_bytes(), 16).unwrap();
        assert_eq!(p.bits(), DH_PRIME_BITS);
        assert!(validate_dh_prime(&p).is_ok());
    }
}
