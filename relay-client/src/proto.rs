//! The tagged payload model and the injected codec boundary.
//!
//! The dispatcher only understands the service constructors listed here;
//! every other payload flows through as [`TlValue::Opaque`] bytes for the
//! application's codec to interpret. [`ServiceCodec`] is the bundled
//! implementation: it covers the service surface, transparently inflates
//! `gzip_packed`, and falls through to opaque for the rest.

use relay_wire::{Reader, WireError, Writer};

use crate::config::AppConfig;

// ── Constructor ids ───────────────────────────────────────────────────────────

pub const MSG_CONTAINER: u32 = 0x73f1f8dc;
pub const RPC_RESULT: u32 = 0xf35c6d01;
pub const RPC_ERROR: u32 = 0x2144ca19;
pub const GZIP_PACKED: u32 = 0x3072cfa1;
pub const PING: u32 = 0x7abe77ec;
pub const PONG: u32 = 0x347773c5;
pub const MSGS_ACK: u32 = 0x62d6b459;
pub const BAD_MSG_NOTIFICATION: u32 = 0xa7eff811;
pub const BAD_SERVER_SALT: u32 = 0xedab447b;
pub const MSGS_STATE_INFO: u32 = 0x04deb57d;
pub const NEW_SESSION_CREATED: u32 = 0x9ec20908;

pub const CONFIG: u32 = 0x86b5778e;
pub const DC_OPTION: u32 = 0x05d8c6cc;
pub const INVOKE_WITH_LAYER: u32 = 0xda9b0d0d;
pub const INIT_CONNECTION: u32 = 0xc7481da6;
pub const HELP_GET_CONFIG: u32 = 0xc4f9186b;

pub const AUTH_SEND_CODE: u32 = 0x86aef0ec;
pub const AUTH_SENT_CODE: u32 = 0x5e002502;
pub const AUTH_SIGN_IN: u32 = 0xbcd51581;
pub const AUTH_AUTHORIZATION: u32 = 0xcd050916;
pub const ACCOUNT_GET_PASSWORD: u32 = 0x548a30f5;
pub const ACCOUNT_PASSWORD: u32 = 0x7c18141c;
pub const ACCOUNT_NO_PASSWORD: u32 = 0x96dabc18;
pub const AUTH_CHECK_PASSWORD: u32 = 0x0a63011e;

const SENT_CODE_APP: u32 = 0x3dbb5986;
const SENT_CODE_SMS: u32 = 0xc000bba2;
const SENT_CODE_CALL: u32 = 0x5353e5a7;
const SENT_CODE_FLASH_CALL: u32 = 0xab03c6d9;

// ── Values ────────────────────────────────────────────────────────────────────

/// One message nested inside a container.
#[derive(Clone, Debug, PartialEq)]
pub struct InnerMessage {
    /// The inner message's own id.
    pub msg_id: i64,
    /// The inner message's own sequence number.
    pub seq_no: i32,
    /// The decoded payload.
    pub value: TlValue,
}

/// A data-center endpoint learned from the configuration response.
#[derive(Clone, Debug, PartialEq)]
pub struct DcOption {
    pub id: i32,
    pub ipv6: bool,
    pub media_only: bool,
    pub tcpo_only: bool,
    pub cdn: bool,
    pub ip: String,
    pub port: i32,
}

/// The subset of the configuration response the core consumes.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigInfo {
    /// The data center this session is attached to.
    pub this_dc: i32,
    /// Known endpoints for migration.
    pub dc_options: Vec<DcOption>,
}

/// The tagged sum of every constructor the core recognises.
#[derive(Clone, Debug, PartialEq)]
pub enum TlValue {
    Container(Vec<InnerMessage>),
    RpcResult { req_msg_id: i64, inner: Box<TlValue> },
    RpcError { code: i32, message: String },
    BadServerSalt { bad_msg_id: i64, bad_msg_seq_no: i32, error_code: i32, new_server_salt: i64 },
    BadMsgNotification { bad_msg_id: i64, bad_msg_seq_no: i32, error_code: i32 },
    MsgsStateInfo { req_msg_id: i64, info: Vec<u8> },
    NewSessionCreated { first_msg_id: i64, unique_id: i64, server_salt: i64 },
    Ping { ping_id: i64 },
    Pong { msg_id: i64, ping_id: i64 },
    MsgsAck { msg_ids: Vec<i64> },
    Bool(bool),
    Config(ConfigInfo),
    SentCode { phone_code_hash: String },
    Authorization,
    PasswordInfo { current_salt: Vec<u8> },
    /// Anything else: the full serialized constructor, tag included.
    Opaque(Vec<u8>),
}

impl TlValue {
    /// The constructor id this value serializes under.
    pub fn constructor_id(&self) -> u32 {
        match self {
            Self::Container(_) => MSG_CONTAINER,
            Self::RpcResult { .. } => RPC_RESULT,
            Self::RpcError { .. } => RPC_ERROR,
            Self::BadServerSalt { .. } => BAD_SERVER_SALT,
            Self::BadMsgNotification { .. } => BAD_MSG_NOTIFICATION,
            Self::MsgsStateInfo { .. } => MSGS_STATE_INFO,
            Self::NewSessionCreated { .. } => NEW_SESSION_CREATED,
            Self::Ping { .. } => PING,
            Self::Pong { .. } => PONG,
            Self::MsgsAck { .. } => MSGS_ACK,
            Self::Bool(true) => relay_wire::BOOL_TRUE_ID,
            Self::Bool(false) => relay_wire::BOOL_FALSE_ID,
            Self::Config(_) => CONFIG,
            Self::SentCode { .. } => AUTH_SENT_CODE,
            Self::Authorization => AUTH_AUTHORIZATION,
            Self::PasswordInfo { .. } => ACCOUNT_PASSWORD,
            Self::Opaque(raw) => {
                if raw.len() >= 4 {
                    u32::from_le_bytes(raw[..4].try_into().unwrap())
                } else {
                    0
                }
            }
        }
    }

    /// Whether this message expects a server acknowledgement (odd sequence).
    pub fn is_content_related(&self) -> bool {
        !matches!(self, Self::MsgsAck { .. } | Self::Pong { .. })
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// The codec boundary: bytes to tagged values and back.
pub trait Codec: Send + Sync {
    /// Serialize a value into its wire bytes.
    fn encode(&self, value: &TlValue) -> Vec<u8>;

    /// Decode wire bytes into a tagged value.
    fn decode(&self, bytes: &[u8]) -> Result<TlValue, WireError>;
}

/// The bundled codec: service constructors plus opaque fallthrough.
pub struct ServiceCodec;

impl Codec for ServiceCodec {
    fn encode(&self, value: &TlValue) -> Vec<u8> {
        let mut w = Writer::new();
        encode_into(&mut w, value);
        w.into_bytes()
    }

    fn decode(&self, bytes: &[u8]) -> Result<TlValue, WireError> {
        decode_value(bytes)
    }
}

fn encode_into(w: &mut Writer, value: &TlValue) {
    match value {
        TlValue::Container(items) => {
            w.u32(MSG_CONTAINER);
            w.i32(items.len() as i32);
            for item in items {
                let body = ServiceCodec.encode(&item.value);
                w.i64(item.msg_id);
                w.i32(item.seq_no);
                w.i32(body.len() as i32);
                w.raw(&body);
            }
        }
        TlValue::RpcResult { req_msg_id, inner } => {
            w.u32(RPC_RESULT);
            w.i64(*req_msg_id);
            encode_into(w, inner);
        }
        TlValue::RpcError { code, message } => {
            w.u32(RPC_ERROR);
            w.i32(*code);
            w.string(message);
        }
        TlValue::BadServerSalt { bad_msg_id, bad_msg_seq_no, error_code, new_server_salt } => {
            w.u32(BAD_SERVER_SALT);
            w.i64(*bad_msg_id);
            w.i32(*bad_msg_seq_no);
            w.i32(*error_code);
            w.i64(*new_server_salt);
        }
        TlValue::BadMsgNotification { bad_msg_id, bad_msg_seq_no, error_code } => {
            w.u32(BAD_MSG_NOTIFICATION);
            w.i64(*bad_msg_id);
            w.i32(*bad_msg_seq_no);
            w.i32(*error_code);
        }
        TlValue::MsgsStateInfo { req_msg_id, info } => {
            w.u32(MSGS_STATE_INFO);
            w.i64(*req_msg_id);
            w.bytes(info);
        }
        TlValue::NewSessionCreated { first_msg_id, unique_id, server_salt } => {
            w.u32(NEW_SESSION_CREATED);
            w.i64(*first_msg_id);
            w.i64(*unique_id);
            w.i64(*server_salt);
        }
        TlValue::Ping { ping_id } => {
            w.u32(PING);
            w.i64(*ping_id);
        }
        TlValue::Pong { msg_id, ping_id } => {
            w.u32(PONG);
            w.i64(*msg_id);
            w.i64(*ping_id);
        }
        TlValue::MsgsAck { msg_ids } => {
            w.u32(MSGS_ACK);
            w.vec_i64(msg_ids);
        }
        TlValue::Bool(v) => w.bool(*v),
        TlValue::Config(cfg) => {
            w.u32(CONFIG);
            w.u32(0); // flags
            w.i32(0); // date
            w.i32(0); // expires
            w.bool(false); // test_mode
            w.i32(cfg.this_dc);
            w.u32(relay_wire::VECTOR_ID);
            w.i32(cfg.dc_options.len() as i32);
            for opt in &cfg.dc_options {
                let mut flags = 0u32;
                if opt.ipv6 {
                    flags |= 1;
                }
                if opt.media_only {
                    flags |= 1 << 1;
                }
                if opt.tcpo_only {
                    flags |= 1 << 2;
                }
                if opt.cdn {
                    flags |= 1 << 3;
                }
                w.u32(DC_OPTION);
                w.u32(flags);
                w.i32(opt.id);
                w.string(&opt.ip);
                w.i32(opt.port);
            }
        }
        TlValue::SentCode { phone_code_hash } => {
            w.u32(AUTH_SENT_CODE);
            w.u32(0); // flags
            w.u32(SENT_CODE_APP);
            w.i32(5);
            w.string(phone_code_hash);
        }
        TlValue::Authorization => {
            w.u32(AUTH_AUTHORIZATION);
            w.u32(0); // flags
        }
        TlValue::PasswordInfo { current_salt } => {
            w.u32(ACCOUNT_PASSWORD);
            w.bytes(current_salt);
        }
        TlValue::Opaque(raw) => w.raw(raw),
    }
}

fn decode_value(bytes: &[u8]) -> Result<TlValue, WireError> {
    let mut r = Reader::new(bytes);
    let tag = r.u32();
    if let Some(e) = r.error() {
        return Err(e.clone());
    }

    let value = match tag {
        MSG_CONTAINER => {
            let count = r.i32();
            let mut items = Vec::with_capacity((count.max(0) as usize).min(1024));
            for _ in 0..count {
                let msg_id = r.i64();
                let seq_no = r.i32();
                let len = r.i32();
                if len < 0 {
                    return Err(WireError::ShortRead);
                }
                let body = r.raw(len as usize);
                if let Some(e) = r.error() {
                    return Err(e.clone());
                }
                items.push(InnerMessage { msg_id, seq_no, value: decode_value(&body)? });
            }
            TlValue::Container(items)
        }
        RPC_RESULT => {
            let req_msg_id = r.i64();
            let rest = r.raw(r.remaining());
            if let Some(e) = r.error() {
                return Err(e.clone());
            }
            TlValue::RpcResult { req_msg_id, inner: Box::new(decode_value(&rest)?) }
        }
        RPC_ERROR => TlValue::RpcError { code: r.i32(), message: r.string() },
        GZIP_PACKED => {
            let packed = r.bytes();
            if let Some(e) = r.error() {
                return Err(e.clone());
            }
            return decode_value(&inflate(&packed)?);
        }
        BAD_SERVER_SALT => TlValue::BadServerSalt {
            bad_msg_id: r.i64(),
            bad_msg_seq_no: r.i32(),
            error_code: r.i32(),
            new_server_salt: r.i64(),
        },
        BAD_MSG_NOTIFICATION => TlValue::BadMsgNotification {
            bad_msg_id: r.i64(),
            bad_msg_seq_no: r.i32(),
            error_code: r.i32(),
        },
        MSGS_STATE_INFO => TlValue::MsgsStateInfo { req_msg_id: r.i64(), info: r.bytes() },
        NEW_SESSION_CREATED => TlValue::NewSessionCreated {
            first_msg_id: r.i64(),
            unique_id: r.i64(),
            server_salt: r.i64(),
        },
        PING => TlValue::Ping { ping_id: r.i64() },
        PONG => TlValue::Pong { msg_id: r.i64(), ping_id: r.i64() },
        MSGS_ACK => TlValue::MsgsAck { msg_ids: r.vec_i64() },
        relay_wire::BOOL_TRUE_ID => TlValue::Bool(true),
        relay_wire::BOOL_FALSE_ID => TlValue::Bool(false),
        relay_wire::VECTOR_ID => {
            // Vector items need schema knowledge; pass the whole thing through.
            return Ok(TlValue::Opaque(bytes.to_vec()));
        }
        CONFIG => {
            let _flags = r.u32();
            let _date = r.i32();
            let _expires = r.i32();
            let _test_mode = r.bool();
            let this_dc = r.i32();
            r.expect(relay_wire::VECTOR_ID);
            let count = r.i32();
            let mut dc_options = Vec::with_capacity((count.max(0) as usize).min(64));
            for _ in 0..count {
                r.expect(DC_OPTION);
                let flags = r.u32();
                let id = r.i32();
                let ip = r.string();
                let port = r.i32();
                if flags & (1 << 10) != 0 {
                    let _secret = r.bytes();
                }
                dc_options.push(DcOption {
                    id,
                    ipv6: flags & 1 != 0,
                    media_only: flags & (1 << 1) != 0,
                    tcpo_only: flags & (1 << 2) != 0,
                    cdn: flags & (1 << 3) != 0,
                    ip,
                    port,
                });
            }
            // Trailing config fields vary by layer; ignore them.
            TlValue::Config(ConfigInfo { this_dc, dc_options })
        }
        AUTH_SENT_CODE => {
            let _flags = r.u32();
            match r.u32() {
                SENT_CODE_APP | SENT_CODE_SMS | SENT_CODE_CALL => {
                    let _length = r.i32();
                }
                SENT_CODE_FLASH_CALL => {
                    let _pattern = r.string();
                }
                other => {
                    return Err(WireError::WrongConstructor { expected: SENT_CODE_APP, got: other })
                }
            }
            TlValue::SentCode { phone_code_hash: r.string() }
        }
        AUTH_AUTHORIZATION => TlValue::Authorization,
        ACCOUNT_PASSWORD | ACCOUNT_NO_PASSWORD => TlValue::PasswordInfo { current_salt: r.bytes() },
        _ => return Ok(TlValue::Opaque(bytes.to_vec())),
    };

    if let Some(e) = r.error() {
        return Err(e.clone());
    }
    Ok(value)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, WireError> {
    use std::io::Read;

    let mut out = Vec::new();
    if flate2::read::GzDecoder::new(data).read_to_end(&mut out).is_ok() && !out.is_empty() {
        return Ok(out);
    }
    out.clear();
    flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|_| WireError::ShortRead)?;
    Ok(out)
}

// ── Request builders ──────────────────────────────────────────────────────────

/// Builders for the requests the core sends on its own behalf. They produce
/// opaque values so they pass through any codec unchanged.
pub mod build {
    use super::*;

    /// `invokeWithLayer(initConnection(help.getConfig))`.
    pub fn init_connection(app: &AppConfig) -> TlValue {
        let mut w = Writer::new();
        w.u32(INVOKE_WITH_LAYER);
        w.i32(app.layer);
        w.u32(INIT_CONNECTION);
        w.i32(app.app_id);
        w.string(&app.device_model);
        w.string(&app.system_version);
        w.string(&app.app_version);
        w.string(&app.system_lang_code);
        w.string(&app.lang_pack);
        w.string(&app.lang_code);
        w.u32(HELP_GET_CONFIG);
        TlValue::Opaque(w.into_bytes())
    }

    /// `auth.sendCode` for the given phone number.
    pub fn send_code(app: &AppConfig, phone: &str) -> TlValue {
        let mut w = Writer::new();
        w.u32(AUTH_SEND_CODE);
        w.u32(1); // flags: current_number present
        w.string(phone);
        w.bool(true); // current_number
        w.i32(app.app_id);
        w.string(&app.app_hash);
        TlValue::Opaque(w.into_bytes())
    }

    /// `auth.signIn` with the received code.
    pub fn sign_in(phone: &str, phone_code_hash: &str, code: &str) -> TlValue {
        let mut w = Writer::new();
        w.u32(AUTH_SIGN_IN);
        w.string(phone);
        w.string(phone_code_hash);
        w.string(code);
        TlValue::Opaque(w.into_bytes())
    }

    /// `account.getPassword`.
    pub fn get_password() -> TlValue {
        let mut w = Writer::new();
        w.u32(ACCOUNT_GET_PASSWORD);
        TlValue::Opaque(w.into_bytes())
    }

    /// `auth.checkPassword` with the salted password hash.
    pub fn check_password(password_hash: &[u8]) -> TlValue {
        let mut w = Writer::new();
        w.u32(AUTH_CHECK_PASSWORD);
        w.bytes(password_hash);
        TlValue::Opaque(w.into_bytes())
    }
}
