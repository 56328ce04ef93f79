//! A small in-memory TPM that speaks the real wire format, used to drive
//! the executor end to end without hardware. Behavior is deterministic:
//! "random" bytes come from a counter, primary keys derive from their
//! template, and capability/PCR responses paginate on purpose.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use veritrust_core::tpm::transport::TransportError;

const TAG_NO_SESSIONS: u16 = 0x8001;
const TAG_SESSIONS: u16 = 0x8002;

const CC_CREATE_PRIMARY: u32 = 0x131;
const CC_INCREMENTAL_SELF_TEST: u32 = 0x142;
const CC_SELF_TEST: u32 = 0x143;
const CC_STARTUP: u32 = 0x144;
const CC_SHUTDOWN: u32 = 0x145;
const CC_STIR_RANDOM: u32 = 0x146;
const CC_FLUSH_CONTEXT: u32 = 0x165;
const CC_READ_PUBLIC: u32 = 0x173;
const CC_START_AUTH_SESSION: u32 = 0x176;
const CC_GET_CAPABILITY: u32 = 0x17A;
const CC_GET_RANDOM: u32 = 0x17B;
const CC_GET_TEST_RESULT: u32 = 0x17C;
const CC_PCR_READ: u32 = 0x17E;
const CC_PCR_EXTEND: u32 = 0x182;

const RC_SUCCESS: u32 = 0;
const RC_INITIALIZE: u32 = 0x100;
const RC_COMMAND_CODE: u32 = 0x143;
/// TPM_RC_HANDLE tagged with handle slot 1.
const RC_HANDLE_1: u32 = 0x18B;

const ALG_SHA256: u16 = 0x000B;

struct FakeSession {
    hash_alg: u16,
    nonce_tpm: Vec<u8>,
    nonce_caller: Vec<u8>,
    is_hmac: bool,
}

pub struct FakeTpm {
    started: bool,
    transient: HashMap<u32, Vec<u8>>,
    sessions: HashMap<u32, FakeSession>,
    next_transient: u32,
    next_session: u32,
    counter: u64,
    pcr_update_counter: u32,
    /// Extended PCR state; registers not present hold their initial value.
    pcr_state: HashMap<(u16, u32), Vec<u8>>,
    /// Cap on bytes per GetRandom, to exercise short-read loops.
    pub max_random: usize,
    /// Cap on PCR registers answered per PcrRead call.
    pub max_pcrs_per_read: usize,
    /// Fixed-property table for GetCapability pagination.
    pub properties: Vec<(u32, u32)>,
    /// Page cap for GetCapability regardless of requested count.
    pub max_properties_per_page: usize,
}

impl FakeTpm {
    pub fn new() -> Self {
        Self {
            started: false,
            transient: HashMap::new(),
            sessions: HashMap::new(),
            next_transient: 0x8000_0000,
            next_session: 0x0200_0000,
            counter: 0,
            pcr_update_counter: 0,
            pcr_state: HashMap::new(),
            max_random: 8,
            max_pcrs_per_read: 2,
            properties: (0..6).map(|i| (0x100 + i, 0x1000 + i)).collect(),
            max_properties_per_page: 1,
        }
    }

    /// Wraps the fake in a transport closure for `TpmDevice`. The
    /// returned handle lets a test inspect TPM-side state afterwards.
    pub fn shared(
        self,
    ) -> (
        std::sync::Arc<std::sync::Mutex<FakeTpm>>,
        impl FnMut(&[u8]) -> Result<Vec<u8>, TransportError> + Send,
    ) {
        let shared = std::sync::Arc::new(std::sync::Mutex::new(self));
        let transport_side = shared.clone();
        let transport =
            move |request: &[u8]| Ok(transport_side.lock().unwrap().handle(request));
        (shared, transport)
    }

    /// Transport-only variant for tests that never look inside the fake.
    pub fn into_transport(
        self,
    ) -> impl FnMut(&[u8]) -> Result<Vec<u8>, TransportError> + Send {
        self.shared().1
    }

    fn next_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            self.counter += 1;
            out.extend_from_slice(&Sha256::digest(self.counter.to_be_bytes()));
        }
        out.truncate(len);
        out
    }

    fn handle(&mut self, request: &[u8]) -> Vec<u8> {
        let mut r = Reader::new(request);
        let tag = r.u16();
        let _size = r.u32();
        let cc = r.u32();

        if !self.started && cc != CC_STARTUP {
            return error_response(RC_INITIALIZE);
        }

        match cc {
            CC_STARTUP => {
                let _su = r.u16();
                if self.started {
                    return error_response(RC_INITIALIZE);
                }
                self.started = true;
                ok_response(&[], &[], None)
            }
            CC_SHUTDOWN => {
                let _su = r.u16();
                self.started = false;
                ok_response(&[], &[], None)
            }
            CC_SELF_TEST => {
                let _full = r.u8();
                ok_response(&[], &[], None)
            }
            CC_INCREMENTAL_SELF_TEST => {
                let count = r.u32() as usize;
                for _ in 0..count {
                    let _alg = r.u16();
                }
                // Everything tests instantly; nothing remains queued.
                let mut params = Writer::new();
                params.u32(0);
                ok_response(&[], &params.buf, None)
            }
            CC_GET_TEST_RESULT => {
                let mut params = Writer::new();
                params.tpm2b(b"fake-tpm self test log");
                params.u32(RC_SUCCESS);
                ok_response(&[], &params.buf, None)
            }
            CC_STIR_RANDOM => {
                let entropy = r.tpm2b();
                let mut hasher = Sha256::new();
                hasher.update(self.counter.to_be_bytes());
                hasher.update(entropy);
                let digest = hasher.finalize();
                self.counter = u64::from_be_bytes(digest[..8].try_into().unwrap());
                ok_response(&[], &[], None)
            }
            CC_READ_PUBLIC => {
                let handle = r.u32();
                let Some(public) = self.transient.get(&handle).cloned() else {
                    return error_response(RC_HANDLE_1);
                };
                let name_digest = Sha256::digest(&public);
                let mut name = Vec::with_capacity(34);
                name.extend_from_slice(&ALG_SHA256.to_be_bytes());
                name.extend_from_slice(&name_digest);

                let mut params = Writer::new();
                params.tpm2b(&public);
                params.tpm2b(&name);
                params.tpm2b(&name); // qualifiedName, same in this fake
                ok_response(&[], &params.buf, None)
            }
            CC_GET_RANDOM => {
                let requested = r.u16() as usize;
                let n = requested.min(self.max_random);
                let bytes = self.next_bytes(n);
                let mut params = Writer::new();
                params.tpm2b(&bytes);
                ok_response(&[], &params.buf, None)
            }
            CC_GET_CAPABILITY => {
                let _cap = r.u32();
                let property = r.u32();
                let requested = r.u32() as usize;
                let page_cap = requested.min(self.max_properties_per_page).max(1);
                let mut page: Vec<(u32, u32)> = self
                    .properties
                    .iter()
                    .copied()
                    .filter(|(p, _)| *p >= property)
                    .collect();
                let more = page.len() > page_cap;
                page.truncate(page_cap);

                let mut params = Writer::new();
                params.u8(more as u8);
                params.u32(0x0000_0006); // TPM_CAP_TPM_PROPERTIES
                params.u32(page.len() as u32);
                for (p, v) in page {
                    params.u32(p);
                    params.u32(v);
                }
                ok_response(&[], &params.buf, None)
            }
            CC_PCR_READ => {
                let count = r.u32() as usize;
                let mut requested: Vec<(u16, u32)> = Vec::new();
                for _ in 0..count {
                    let alg = r.u16();
                    let len = r.u8() as usize;
                    let select = r.bytes(len).to_vec();
                    for (byte, bits) in select.iter().enumerate() {
                        for bit in 0..8 {
                            if bits & (1 << bit) != 0 {
                                requested.push((alg, (byte * 8 + bit) as u32));
                            }
                        }
                    }
                }
                let answered: Vec<(u16, u32)> = requested
                    .into_iter()
                    .take(self.max_pcrs_per_read)
                    .collect();
                self.pcr_update_counter += 1;

                let mut out_select = vec![0u8; 3];
                for (_, pcr) in &answered {
                    out_select[(*pcr / 8) as usize] |= 1 << (*pcr % 8);
                }

                let mut params = Writer::new();
                params.u32(self.pcr_update_counter);
                params.u32(1); // one selection structure back
                params.u16(answered.first().map(|(alg, _)| *alg).unwrap_or(ALG_SHA256));
                params.u8(out_select.len() as u8);
                params.buf.extend_from_slice(&out_select);
                params.u32(answered.len() as u32);
                for (alg, pcr) in &answered {
                    let value = self
                        .pcr_state
                        .get(&(*alg, *pcr))
                        .cloned()
                        .unwrap_or_else(|| pcr_value(*alg, *pcr));
                    params.tpm2b(&value);
                }
                ok_response(&[], &params.buf, None)
            }
            CC_PCR_EXTEND => {
                let pcr = r.u32();
                if tag != TAG_SESSIONS {
                    return error_response(RC_COMMAND_CODE);
                }
                let auth_size = r.u32() as usize;
                let auths = self.read_auth_area(&mut r, auth_size);

                let count = r.u32() as usize;
                for _ in 0..count {
                    let alg = r.u16();
                    let digest = r.bytes(32).to_vec();
                    let old = self
                        .pcr_state
                        .get(&(alg, pcr))
                        .cloned()
                        .unwrap_or_else(|| pcr_value(alg, pcr));
                    let mut hasher = Sha256::new();
                    hasher.update(&old);
                    hasher.update(&digest);
                    self.pcr_state.insert((alg, pcr), hasher.finalize().to_vec());
                }
                self.pcr_update_counter += 1;

                let auth_area = self.build_response_auths(&auths, CC_PCR_EXTEND, &[]);
                ok_response(&[], &[], Some(auth_area))
            }
            CC_START_AUTH_SESSION => {
                let _tpm_key = r.u32();
                let _bind = r.u32();
                let _nonce_caller = r.tpm2b().to_vec();
                let _salt = r.tpm2b();
                let session_type = r.u8();
                let sym_alg = r.u16();
                if sym_alg != 0x0010 {
                    let _kb = r.u16();
                    let _mode = r.u16();
                }
                let auth_hash = r.u16();
                if auth_hash != ALG_SHA256 {
                    return error_response(RC_COMMAND_CODE);
                }

                self.next_session += 1;
                let base = if session_type == 0x01 { 0x0300_0000 } else { 0x0200_0000 };
                let handle = base | (self.next_session & 0x00FF_FFFF);
                let nonce_tpm = self.next_bytes(32);
                self.sessions.insert(
                    handle,
                    FakeSession {
                        hash_alg: auth_hash,
                        nonce_tpm: nonce_tpm.clone(),
                        nonce_caller: Vec::new(),
                        is_hmac: session_type == 0x00,
                    },
                );

                let mut params = Writer::new();
                params.tpm2b(&nonce_tpm);
                ok_response(&[handle], &params.buf, None)
            }
            CC_FLUSH_CONTEXT => {
                let handle = r.u32();
                let known = self.transient.remove(&handle).is_some()
                    || self.sessions.remove(&handle).is_some();
                if known {
                    ok_response(&[], &[], None)
                } else {
                    error_response(RC_HANDLE_1)
                }
            }
            CC_CREATE_PRIMARY => {
                let hierarchy = r.u32();
                if tag != TAG_SESSIONS {
                    return error_response(RC_COMMAND_CODE);
                }
                let auth_size = r.u32() as usize;
                let auths = self.read_auth_area(&mut r, auth_size);

                let _sensitive = r.tpm2b();
                let template = r.tpm2b().to_vec();
                let outside_info = r.tpm2b().to_vec();

                // Deterministic key material: unique bytes derive from
                // hierarchy and template, so identical inputs produce an
                // identical public area and therefore an identical name.
                let mut hasher = Sha256::new();
                hasher.update(hierarchy.to_be_bytes());
                hasher.update(&template);
                let seed = hasher.finalize();
                let out_public = fill_unique(&template, &seed);

                let name_digest = Sha256::digest(&out_public);
                let mut name = Vec::with_capacity(34);
                name.extend_from_slice(&ALG_SHA256.to_be_bytes());
                name.extend_from_slice(&name_digest);

                self.next_transient += 1;
                let handle = self.next_transient;
                self.transient.insert(handle, out_public.clone());

                let mut params = Writer::new();
                params.tpm2b(&out_public);
                params.tpm2b(&[]); // creationData, empty in this fake
                params.tpm2b(&Sha256::digest(&outside_info));
                params.u16(0x8021); // TPM_ST_CREATION
                params.u32(hierarchy);
                params.tpm2b(&[]);
                params.tpm2b(&name);

                let auth_area = self.build_response_auths(&auths, CC_CREATE_PRIMARY, &params.buf);
                ok_response(&[handle], &params.buf, Some(auth_area))
            }
            _ => error_response(RC_COMMAND_CODE),
        }
    }

    fn read_auth_area(&mut self, r: &mut Reader, auth_size: usize) -> Vec<u32> {
        let end = r.pos + auth_size;
        let mut session_handles = Vec::new();
        while r.pos < end {
            let handle = r.u32();
            let nonce_caller = r.tpm2b().to_vec();
            let _attrs = r.u8();
            let _hmac = r.tpm2b();
            if let Some(session) = self.sessions.get_mut(&handle) {
                session.nonce_caller = nonce_caller;
            }
            session_handles.push(handle);
        }
        session_handles
    }

    /// One response authorization per request session, with the HMAC the
    /// executor will verify for unbound, unsalted sessions (empty key).
    fn build_response_auths(&mut self, handles: &[u32], cc: u32, params: &[u8]) -> Vec<u8> {
        let mut out = Writer::new();
        for handle in handles {
            if *handle == 0x4000_0009 {
                // Password pseudo-session: empty nonce, continue, no HMAC.
                out.tpm2b(&[]);
                out.u8(0x01);
                out.tpm2b(&[]);
                continue;
            }
            let fresh_nonce = self.next_bytes(32);
            let (is_hmac, nonce_caller) = match self.sessions.get_mut(handle) {
                Some(session) => {
                    session.nonce_tpm = fresh_nonce.clone();
                    (
                        session.is_hmac && session.hash_alg == ALG_SHA256,
                        session.nonce_caller.clone(),
                    )
                }
                None => (false, Vec::new()),
            };
            let hmac_bytes = if is_hmac {
                let mut rp = Sha256::new();
                rp.update(RC_SUCCESS.to_be_bytes());
                rp.update(cc.to_be_bytes());
                rp.update(params);
                let rp_hash = rp.finalize();

                let mut mac = <Hmac<Sha256>>::new_from_slice(&[]).expect("empty key");
                mac.update(&rp_hash);
                mac.update(&fresh_nonce);
                mac.update(&nonce_caller);
                mac.update(&[0x01]); // continueSession
                mac.finalize().into_bytes().to_vec()
            } else {
                Vec::new()
            };
            out.tpm2b(&fresh_nonce);
            out.u8(0x01);
            out.tpm2b(&hmac_bytes);
        }
        out.buf
    }

    pub fn session_nonce(&self, handle: u32) -> Option<&[u8]> {
        self.sessions.get(&handle).map(|s| s.nonce_tpm.as_slice())
    }
}

pub fn pcr_value(alg: u16, pcr: u32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(b"pcr");
    hasher.update(alg.to_be_bytes());
    hasher.update(pcr.to_be_bytes());
    hasher.finalize().to_vec()
}

/// Replaces the trailing unique field of an encoded ECC/RSA template with
/// deterministic bytes so the fake "generates" a key.
fn fill_unique(template: &[u8], seed: &[u8]) -> Vec<u8> {
    // The templates this fake sees end with their (empty) unique TPM2Bs.
    // ECC templates end with two empty TPM2Bs, RSA with one.
    let alg = u16::from_be_bytes([template[0], template[1]]);
    let mut out = template.to_vec();
    match alg {
        0x0023 => {
            // ECC: strip two empty 2Bs, append 32-byte x and y.
            out.truncate(out.len() - 4);
            out.extend_from_slice(&32u16.to_be_bytes());
            out.extend_from_slice(&seed[..32]);
            out.extend_from_slice(&32u16.to_be_bytes());
            let mut y = Sha256::digest(seed).to_vec();
            y.truncate(32);
            out.extend_from_slice(&y);
        }
        _ => {
            // RSA and keyed hash: strip one empty 2B, append a digest.
            out.truncate(out.len() - 2);
            out.extend_from_slice(&32u16.to_be_bytes());
            out.extend_from_slice(&seed[..32]);
        }
    }
    out
}

fn ok_response(handles: &[u32], params: &[u8], auth_area: Option<Vec<u8>>) -> Vec<u8> {
    let with_sessions = auth_area.is_some();
    let mut w = Writer::new();
    w.u16(if with_sessions { TAG_SESSIONS } else { TAG_NO_SESSIONS });
    w.u32(0); // patched below
    w.u32(RC_SUCCESS);
    for handle in handles {
        w.u32(*handle);
    }
    if let Some(auth_area) = auth_area {
        w.u32(params.len() as u32);
        w.buf.extend_from_slice(params);
        w.buf.extend_from_slice(&auth_area);
    } else {
        w.buf.extend_from_slice(params);
    }
    let total = w.buf.len() as u32;
    w.buf[2..6].copy_from_slice(&total.to_be_bytes());
    w.buf
}

fn error_response(rc: u32) -> Vec<u8> {
    let mut w = Writer::new();
    w.u16(TAG_NO_SESSIONS);
    w.u32(10);
    w.u32(rc);
    w.buf
}

// Minimal big-endian helpers; the fake deliberately does not reuse the
// crate's codec so the two sides stay independent.

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let v = self.data[self.pos];
        self.pos += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_be_bytes(self.data[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        v
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_be_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn bytes(&mut self, n: usize) -> &'a [u8] {
        let v = &self.data[self.pos..self.pos + n];
        self.pos += n;
        v
    }

    fn tpm2b(&mut self) -> &'a [u8] {
        let len = self.u16() as usize;
        self.bytes(len)
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn tpm2b(&mut self, bytes: &[u8]) {
        self.u16(bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
    }
}
