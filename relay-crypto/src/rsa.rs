//! Raw RSA encryption for the handshake's inner-data step.
//!
//! The handshake encrypts a SHA-1-prefixed, randomly padded 255-byte block
//! as a bare `m^e mod n` — no OAEP, no PKCS#1. Key fingerprints are the last
//! 8 bytes of SHA-1 over the wire serialization of `(n, e)`.

use num_bigint::BigUint;

use crate::sha1;

/// Length of the padded plaintext block.
const BLOCK_LEN: usize = 255;

/// A server RSA public key `(n, e)`.
pub struct Key {
    n: BigUint,
    e: BigUint,
}

impl Key {
    /// Parse `n` and `e` from decimal strings.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self {
            n: BigUint::parse_bytes(n.as_bytes(), 10)?,
            e: BigUint::parse_bytes(e.as_bytes(), 10)?,
        })
    }

    /// The key's wire fingerprint: little-endian i64 of the last 8 bytes of
    /// SHA-1 over `bytes(n) | bytes(e)` in wire framing.
    pub fn fingerprint(&self) -> i64 {
        let mut w = relay_wire::Writer::new();
        w.bytes(&self.n.to_bytes_be());
        w.bytes(&self.e.to_bytes_be());
        let digest = sha1!(w.as_ref());
        i64::from_le_bytes(digest[12..].try_into().unwrap())
    }
}

/// Encrypt `data` under `key` as a raw RSA block.
///
/// The plaintext block is `sha1(data) | data | random padding` filled to
/// exactly 255 bytes; `random` must supply at least the padding length.
/// Returns the 256-byte big-endian ciphertext.
pub fn encrypt_raw(data: &[u8], key: &Key, random: &[u8]) -> Vec<u8> {
    assert!(data.len() + 20 <= BLOCK_LEN, "inner data too large for one RSA block");

    let mut block = Vec::with_capacity(BLOCK_LEN);
    block.extend_from_slice(&sha1!(data));
    block.extend_from_slice(data);
    let pad = BLOCK_LEN - block.len();
    block.extend_from_slice(&random[..pad]);

    let m = BigUint::from_bytes_be(&block);
    let c = m.modpow(&key.e, &key.n);
    let mut out = c.to_bytes_be();
    while out.len() < 256 {
        out.insert(0, 0);
    }
    out
}

/// The server public keys this client trusts.
pub fn known_keys() -> Vec<Key> {
    [
        // Production endpoint key.
        Key::new(
            "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323",
            "65537",
        ),
        // Staging endpoint key.
        Key::new(
            "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949",
            "65537",
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Pick the first known key whose fingerprint appears in `fingerprints`.
pub fn find_key(fingerprints: &[i64]) -> Option<(i64, Key)> {
    known_keys()
        .into_iter()
        .map(|k| (k.fingerprint(), k))
        .find(|(fp, _)| fingerprints.contains(fp))
}
