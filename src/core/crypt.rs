//! Standard Security Handler (ISO 32000-1 §7.6): RC4 (V1/V2), crypt-filter
//! selection (V4), AES-256 (V5, revisions 5 and 6), and Adobe.PubSec
//! public-key documents via an injectable envelope-decrypt callback.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use log::{debug, warn};
use md5::{Digest, Md5};
use sha2::{Sha256, Sha384, Sha512};

use crate::core::error::{PdfError, Result};
use crate::core::object::{Dict, Object};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Host callback decrypting a PKCS#7 envelope to the 20-byte seed.
pub type CertificateDecrypt = dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync;

/// Password padding string from the standard handler.
const PAD: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    Rc4,
    Aes128,
    Aes256,
    Identity,
}

/// Holds the computed file key and stream/string cipher selection.
pub struct Decryptor {
    key: Vec<u8>,
    stream_method: CryptMethod,
    string_method: CryptMethod,
}

impl Decryptor {
    /// Build from the trailer's `/Encrypt` dictionary. `file_id` is the raw
    /// first element of the trailer `/ID` array; `password` is the
    /// user-supplied password (usually empty).
    pub fn new(
        enc: &Dict,
        file_id: &[u8],
        password: &[u8],
        cert: Option<&CertificateDecrypt>,
    ) -> Result<Decryptor> {
        let filter = enc.get("Filter").and_then(|o| o.as_name()).unwrap_or("Standard");
        let v = enc.get("V").and_then(|o| o.as_i64()).unwrap_or(0);
        let r = enc.get("R").and_then(|o| o.as_i64()).unwrap_or(2);
        let length_bits = enc.get("Length").and_then(|o| o.as_i64()).unwrap_or(40);
        let key_len = (length_bits / 8).clamp(5, 32) as usize;
        debug!("encrypt: filter={filter} V={v} R={r} length={length_bits}");

        if filter != "Standard" {
            return Self::new_public_key(enc, key_len, cert);
        }

        let o = enc.get("O").and_then(|x| x.as_string()).unwrap_or(&[]).to_vec();
        let u = enc.get("U").and_then(|x| x.as_string()).unwrap_or(&[]).to_vec();
        let p = enc.get("P").and_then(|x| x.as_i64()).unwrap_or(-1) as i32;
        let encrypt_metadata = enc
            .get("EncryptMetadata")
            .and_then(|x| x.as_bool())
            .unwrap_or(true);

        if v == 5 {
            let key = derive_key_v5(enc, password, &o, &u, r)?;
            return Ok(Decryptor {
                key,
                stream_method: CryptMethod::Aes256,
                string_method: CryptMethod::Aes256,
            });
        }

        // V <= 4: RC4-style file key (algorithm 2)
        let mut key = file_key_r234(password, &o, p, file_id, r, key_len, encrypt_metadata);
        if !user_password_matches(&key, &u, file_id, r) {
            // maybe the password is the owner password: recover the user
            // password by unwinding /O (algorithm 7), then retry
            if let Some(user_pwd) = recover_user_password(password, &o, r, key_len) {
                key = file_key_r234(&user_pwd, &o, p, file_id, r, key_len, encrypt_metadata);
            }
            if !user_password_matches(&key, &u, file_id, r) {
                return Err(PdfError::Encryption("unauthorized: wrong password".into()));
            }
        }

        let (stream_method, string_method) = if v == 4 {
            let stm = crypt_filter_method(enc, "StmF");
            let str_ = crypt_filter_method(enc, "StrF");
            (stm, str_)
        } else {
            (CryptMethod::Rc4, CryptMethod::Rc4)
        };
        Ok(Decryptor { key, stream_method, string_method })
    }

    fn new_public_key(
        enc: &Dict,
        key_len: usize,
        cert: Option<&CertificateDecrypt>,
    ) -> Result<Decryptor> {
        let Some(cert) = cert else {
            return Err(PdfError::Encryption("certificate decrypt callback required".into()));
        };
        let recipients = public_key_recipients(enc);
        if recipients.is_empty() {
            return Err(PdfError::Encryption("no /Recipients in encrypt dict".into()));
        }
        let mut seed = None;
        for envelope in &recipients {
            if let Some(s) = cert(envelope) {
                seed = Some(s);
                break;
            }
        }
        let Some(seed) = seed else {
            return Err(PdfError::Encryption("unauthorized: no matching certificate".into()));
        };
        // file key = SHA-1(seed || all recipient envelopes), truncated
        let mut hasher = sha1::Sha1::new();
        hasher.update(&seed);
        for envelope in &recipients {
            hasher.update(envelope);
        }
        let digest = hasher.finalize();
        let key = digest[..key_len.min(20)].to_vec();
        let method = crypt_filter_method(enc, "StmF");
        let method = if method == CryptMethod::Identity { CryptMethod::Rc4 } else { method };
        Ok(Decryptor { key, stream_method: method, string_method: method })
    }

    pub fn decrypt_stream(&self, num: u32, generation: u16, data: &[u8]) -> Vec<u8> {
        self.apply(self.stream_method, num, generation, data)
    }

    pub fn decrypt_string(&self, num: u32, generation: u16, data: &[u8]) -> Vec<u8> {
        self.apply(self.string_method, num, generation, data)
    }

    fn apply(&self, method: CryptMethod, num: u32, generation: u16, data: &[u8]) -> Vec<u8> {
        match method {
            CryptMethod::Identity => data.to_vec(),
            CryptMethod::Rc4 => {
                let key = object_key(&self.key, num, generation, false);
                rc4(&key, data)
            }
            CryptMethod::Aes128 => {
                let key = object_key(&self.key, num, generation, true);
                aes_cbc_decrypt(&key, data).unwrap_or_else(|| data.to_vec())
            }
            // AES-256 uses the file key directly, no per-object derivation
            CryptMethod::Aes256 => {
                aes_cbc_decrypt(&self.key, data).unwrap_or_else(|| data.to_vec())
            }
        }
    }
}

/// Per-object key: MD5(file key || obj low 3 bytes || generation low 2 bytes ||
/// "sAlT" for AES), truncated to min(16, key length + 5).
fn object_key(file_key: &[u8], num: u32, generation: u16, aes: bool) -> Vec<u8> {
    let mut h = Md5::new();
    h.update(file_key);
    h.update(&num.to_le_bytes()[..3]);
    h.update(&generation.to_le_bytes()[..2]);
    if aes {
        h.update(b"sAlT");
    }
    let digest = h.finalize();
    let n = (file_key.len() + 5).min(16);
    digest[..n].to_vec()
}

/// Algorithm 2: the file encryption key for revisions 2–4.
fn file_key_r234(
    password: &[u8],
    o: &[u8],
    p: i32,
    file_id: &[u8],
    r: i64,
    key_len: usize,
    encrypt_metadata: bool,
) -> Vec<u8> {
    let mut h = Md5::new();
    h.update(pad_password(password));
    h.update(&o[..o.len().min(32)]);
    h.update((p as u32).to_le_bytes());
    h.update(file_id);
    if r >= 4 && !encrypt_metadata {
        h.update([0xFF, 0xFF, 0xFF, 0xFF]);
    }
    let mut digest = h.finalize().to_vec();
    if r >= 3 {
        for _ in 0..50 {
            digest = Md5::digest(&digest[..key_len]).to_vec();
        }
    }
    digest.truncate(key_len);
    digest
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let n = password.len().min(32);
    out[..n].copy_from_slice(&password[..n]);
    out[n..].copy_from_slice(&PAD[..32 - n]);
    out
}

/// Algorithms 4/5: verify the file key against /U.
fn user_password_matches(key: &[u8], u: &[u8], file_id: &[u8], r: i64) -> bool {
    if u.len() < 16 {
        return false;
    }
    if r == 2 {
        let expected = rc4(key, &PAD);
        return expected[..] == u[..32.min(u.len())];
    }
    let mut h = Md5::new();
    h.update(PAD);
    h.update(file_id);
    let mut data = h.finalize().to_vec();
    data = rc4(key, &data);
    for i in 1..=19u8 {
        let step: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        data = rc4(&step, &data);
    }
    data[..16] == u[..16]
}

/// Algorithm 7 (inverted): RC4-unwind /O with the owner key to recover the
/// user password bytes.
fn recover_user_password(owner_password: &[u8], o: &[u8], r: i64, key_len: usize) -> Option<Vec<u8>> {
    if o.len() < 32 {
        return None;
    }
    let mut digest = Md5::digest(pad_password(owner_password)).to_vec();
    if r >= 3 {
        for _ in 0..50 {
            digest = Md5::digest(&digest).to_vec();
        }
    }
    let key = &digest[..key_len];
    let mut data = o[..32].to_vec();
    if r == 2 {
        data = rc4(key, &data);
    } else {
        for i in (0..=19u8).rev() {
            let step: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            data = rc4(&step, &data);
        }
    }
    Some(data)
}

/// V5 (AES-256): validate the password against /U or /O and unwrap the file
/// key from /UE or /OE.
fn derive_key_v5(enc: &Dict, password: &[u8], o: &[u8], u: &[u8], r: i64) -> Result<Vec<u8>> {
    if o.len() < 48 || u.len() < 48 {
        return Err(PdfError::Encryption("truncated /O or /U".into()));
    }
    let pwd = &password[..password.len().min(127)];
    let ue = enc.get("UE").and_then(|x| x.as_string()).unwrap_or(&[]);
    let oe = enc.get("OE").and_then(|x| x.as_string()).unwrap_or(&[]);

    // user password: validation salt U[32..40], key salt U[40..48]
    let user_hash = hash_v5(pwd, &u[32..40], &[], r);
    if user_hash == u[..32] {
        let inter = hash_v5(pwd, &u[40..48], &[], r);
        return unwrap_file_key(&inter, ue);
    }
    // owner password: salts in O, with the whole /U as extra data
    let owner_hash = hash_v5(pwd, &o[32..40], &u[..48], r);
    if owner_hash == o[..32] {
        let inter = hash_v5(pwd, &o[40..48], &u[..48], r);
        return unwrap_file_key(&inter, oe);
    }
    Err(PdfError::Encryption("unauthorized: wrong password".into()))
}

fn unwrap_file_key(intermediate: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
    if wrapped.len() < 32 || intermediate.len() < 32 {
        return Err(PdfError::Encryption("truncated key material".into()));
    }
    let iv = [0u8; 16];
    let mut buf = wrapped[..32].to_vec();
    Aes256CbcDec::new_from_slices(&intermediate[..32], &iv)
        .map_err(|_| PdfError::Encryption("bad key length".into()))?
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| PdfError::Encryption("file key unwrap failed".into()))?;
    Ok(buf)
}

/// The R5 SHA-256 hash, or the R6 hardened iterated hash (algorithm 2.B).
fn hash_v5(password: &[u8], salt: &[u8], udata: &[u8], r: i64) -> Vec<u8> {
    let mut k: Vec<u8> = {
        let mut h = Sha256::new();
        h.update(password);
        h.update(salt);
        h.update(udata);
        h.finalize().to_vec()
    };
    if r < 6 {
        return k;
    }
    let mut round = 0usize;
    loop {
        let mut block = Vec::with_capacity((password.len() + k.len() + udata.len()) * 64);
        for _ in 0..64 {
            block.extend_from_slice(password);
            block.extend_from_slice(&k);
            block.extend_from_slice(udata);
        }
        let e = Aes128CbcEnc::new_from_slices(&k[..16], &k[16..32])
            .expect("fixed-size key and iv")
            .encrypt_padded_vec_mut::<NoPadding>(&block);
        let modulus = e[..16].iter().map(|&b| b as u32).sum::<u32>() % 3;
        k = match modulus {
            0 => Sha256::digest(&e).to_vec(),
            1 => Sha384::digest(&e).to_vec(),
            _ => Sha512::digest(&e).to_vec(),
        };
        round += 1;
        if round >= 64 && (*e.last().unwrap() as usize) <= round - 32 {
            break;
        }
    }
    k.truncate(32);
    k
}

/// Resolve a V4 crypt-filter name (`StmF`/`StrF`) to a cipher.
fn crypt_filter_method(enc: &Dict, role: &str) -> CryptMethod {
    let name = enc.get(role).and_then(|o| o.as_name()).unwrap_or("Identity");
    if name == "Identity" {
        return CryptMethod::Identity;
    }
    let cfm = enc
        .get("CF")
        .and_then(|o| o.as_dict())
        .and_then(|cf| cf.get(name))
        .and_then(|o| o.as_dict())
        .and_then(|f| f.get("CFM"))
        .and_then(|o| o.as_name())
        .unwrap_or("V2");
    match cfm {
        "AESV2" => CryptMethod::Aes128,
        "AESV3" => CryptMethod::Aes256,
        "None" => CryptMethod::Identity,
        _ => CryptMethod::Rc4,
    }
}

/// Collect the PKCS#7 recipient envelopes from a public-key encrypt dict
/// (top-level /Recipients or inside the default crypt filter).
fn public_key_recipients(enc: &Dict) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut push_from = |obj: Option<&Object>| {
        if let Some(arr) = obj.and_then(|o| o.as_array()) {
            for item in arr {
                if let Some(s) = item.as_string() {
                    out.push(s.to_vec());
                }
            }
        }
    };
    push_from(enc.get("Recipients"));
    if let Some(cf) = enc.get("CF").and_then(|o| o.as_dict()) {
        for (_, f) in cf.iter() {
            if let Some(d) = f.as_dict() {
                push_from(d.get("Recipients"));
            }
        }
    }
    out
}

/// AES-CBC with the 16-byte IV carried as the payload prefix.
fn aes_cbc_decrypt(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < 16 || (data.len() - 16) % 16 != 0 {
        warn!("aes: payload not block aligned ({} bytes)", data.len());
        return None;
    }
    let (iv, ct) = data.split_at(16);
    let mut buf = ct.to_vec();
    let res = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_mut::<Pkcs7>(&mut buf),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_mut::<Pkcs7>(&mut buf),
        _ => return None,
    };
    match res {
        Ok(pt) => Some(pt.to_vec()),
        // tolerate producers that forgot the padding
        Err(_) => Some(buf),
    }
}

/// Plain RC4.
pub fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return data.to_vec();
    }
    let mut s: [u8; 256] = std::array::from_fn(|i| i as u8);
    let mut j = 0u8;
    for i in 0..256 {
        j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
        s.swap(i, j as usize);
    }
    let mut out = Vec::with_capacity(data.len());
    let (mut i, mut j) = (0u8, 0u8);
    for &b in data {
        i = i.wrapping_add(1);
        j = j.wrapping_add(s[i as usize]);
        s.swap(i as usize, j as usize);
        let k = s[(s[i as usize].wrapping_add(s[j as usize])) as usize];
        out.push(b ^ k);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc4_known_vectors() {
        // RFC 6229-style vector: key "Key", plaintext "Plaintext"
        let ct = rc4(b"Key", b"Plaintext");
        assert_eq!(ct, [0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3]);
        // RC4 is symmetric
        assert_eq!(rc4(b"Key", &ct), b"Plaintext");
    }

    #[test]
    fn object_key_truncation() {
        let file_key = vec![1u8; 5]; // 40-bit
        let k = object_key(&file_key, 7, 0, false);
        assert_eq!(k.len(), 10);
        let file_key = vec![1u8; 16];
        let k = object_key(&file_key, 7, 0, true);
        assert_eq!(k.len(), 16);
    }

    #[test]
    fn pad_short_password() {
        let p = pad_password(b"abc");
        assert_eq!(&p[..3], b"abc");
        assert_eq!(&p[3..], &PAD[..29]);
        assert_eq!(pad_password(b""), PAD);
    }

    /// End-to-end: build a RC4 40-bit R2 encrypt dict for the empty user
    /// password and check the derived key round-trips content.
    #[test]
    fn r2_empty_password_roundtrip() {
        let file_id = b"0123456789abcdef".to_vec();
        let p: i32 = -4;
        // forward-compute /O for an empty owner password
        let owner_digest = Md5::digest(pad_password(b""));
        let o = rc4(&owner_digest[..5], &pad_password(b""));
        let key = file_key_r234(b"", &o, p, &file_id, 2, 5, true);
        let u = rc4(&key, &PAD);

        let mut enc = Dict::new();
        enc.set("Filter", Object::Name("Standard".into()));
        enc.set("V", Object::Integer(1));
        enc.set("R", Object::Integer(2));
        enc.set("Length", Object::Integer(40));
        enc.set("O", Object::String(o));
        enc.set("U", Object::String(u));
        enc.set("P", Object::Integer(p as i64));

        let d = Decryptor::new(&enc, &file_id, b"", None).expect("authorized");
        let plain = b"BT /F1 12 Tf (secret) Tj ET";
        let obj_key = object_key(&d.key, 5, 0, false);
        let ct = rc4(&obj_key, plain);
        assert_eq!(d.decrypt_stream(5, 0, &ct), plain);
    }

    #[test]
    fn wrong_password_is_unauthorized() {
        let file_id = b"0123456789abcdef".to_vec();
        let owner_digest = Md5::digest(pad_password(b"owner"));
        let o = rc4(&owner_digest[..5], &pad_password(b"user"));
        let key = file_key_r234(b"user", &o, -4, &file_id, 2, 5, true);
        let u = rc4(&key, &PAD);

        let mut enc = Dict::new();
        enc.set("Filter", Object::Name("Standard".into()));
        enc.set("V", Object::Integer(1));
        enc.set("R", Object::Integer(2));
        enc.set("O", Object::String(o));
        enc.set("U", Object::String(u));
        enc.set("P", Object::Integer(-4));

        assert!(Decryptor::new(&enc, &file_id, b"nope", None).is_err());
        // correct user password authorizes
        assert!(Decryptor::new(&enc, &file_id, b"user", None).is_ok());
        // owner password authorizes through the /O unwind
        assert!(Decryptor::new(&enc, &file_id, b"owner", None).is_ok());
    }

    #[test]
    fn aes_iv_prefix_roundtrip() {
        type Enc = cbc::Encryptor<aes::Aes128>;
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let plain = b"sixteen byte msg"; // exactly one block, Pkcs7 adds one more
        let ct = Enc::new_from_slices(&key, &iv)
            .unwrap()
            .encrypt_padded_vec_mut::<Pkcs7>(plain);
        let mut payload = iv.to_vec();
        payload.extend_from_slice(&ct);
        assert_eq!(aes_cbc_decrypt(&key, &payload).unwrap(), plain);
    }
}
