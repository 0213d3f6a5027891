use relay_wire::{Reader, WireError, Writer};

// ── Integers ──────────────────────────────────────────────────────────────────

#[test]
fn roundtrip_ints() {
    let mut w = Writer::new();
    w.i32(-7);
    w.u32(0xdeadbeef);
    w.i64(i64::MIN);
    w.f64(1.5);
    let buf = w.into_bytes();

    let mut r = Reader::new(&buf);
    assert_eq!(r.i32(), -7);
    assert_eq!(r.u32(), 0xdeadbeef);
    assert_eq!(r.i64(), i64::MIN);
    assert_eq!(r.f64(), 1.5);
    assert!(r.finish().is_ok());
}

// ── Byte strings ──────────────────────────────────────────────────────────────

#[test]
fn short_string_is_aligned() {
    for len in 0..=16 {
        let data: Vec<u8> = (0..len as u8).collect();
        let mut w = Writer::new();
        w.bytes(&data);
        let buf = w.into_bytes();
        assert_eq!(buf.len() % 4, 0, "len {len} not aligned");

        let mut r = Reader::new(&buf);
        assert_eq!(r.bytes(), data);
        assert_eq!(r.remaining(), 0);
        assert!(r.finish().is_ok());
    }
}

#[test]
fn long_string_uses_marker() {
    let data = vec![0xabu8; 300];
    let mut w = Writer::new();
    w.bytes(&data);
    let buf = w.into_bytes();
    assert_eq!(buf[0], 0xfe);
    assert_eq!(buf.len() % 4, 0);

    let mut r = Reader::new(&buf);
    assert_eq!(r.bytes(), data);
    assert!(r.finish().is_ok());
}

#[test]
fn string_roundtrip() {
    let mut w = Writer::new();
    w.string("héllo wörld");
    let buf = w.into_bytes();
    let mut r = Reader::new(&buf);
    assert_eq!(r.string(), "héllo wörld");
}

#[test]
fn truncated_padding_is_bad_padding() {
    // length 2 + 1 header byte needs 1 pad byte; drop it.
    let buf = [0x02, 0xaa, 0xbb];
    let mut r = Reader::new(&buf);
    r.bytes();
    assert_eq!(r.finish(), Err(WireError::BadPadding));
}

#[test]
fn truncated_body_is_short_read() {
    let buf = [0x08, 0x01, 0x02];
    let mut r = Reader::new(&buf);
    r.bytes();
    assert_eq!(r.finish(), Err(WireError::ShortRead));
}

// ── Vectors & bools ───────────────────────────────────────────────────────────

#[test]
fn vec_i64_roundtrip() {
    let ids = [10i64, -4, i64::MAX];
    let mut w = Writer::new();
    w.vec_i64(&ids);
    let buf = w.into_bytes();

    let mut r = Reader::new(&buf);
    assert_eq!(r.vec_i64(), ids.to_vec());
    assert!(r.finish().is_ok());
}

#[test]
fn vec_wrong_constructor() {
    let mut w = Writer::new();
    w.u32(0x12345678);
    w.i32(0);
    let buf = w.into_bytes();
    let mut r = Reader::new(&buf);
    assert!(r.vec_i64().is_empty());
    assert!(matches!(r.finish(), Err(WireError::WrongConstructor { .. })));
}

#[test]
fn bool_roundtrip() {
    for v in [true, false] {
        let mut w = Writer::new();
        w.bool(v);
        let buf = w.into_bytes();
        let mut r = Reader::new(&buf);
        assert_eq!(r.bool(), v);
        assert!(r.finish().is_ok());
    }
}

// ── Big ints ──────────────────────────────────────────────────────────────────

#[test]
fn big_bytes_keep_magnitude() {
    let magnitude = [0x17, 0xed, 0x48, 0x94, 0x1a, 0x08, 0xf9, 0x81];
    let mut w = Writer::new();
    w.big_bytes(&magnitude);
    let buf = w.into_bytes();
    let mut r = Reader::new(&buf);
    assert_eq!(r.big_bytes(), magnitude.to_vec());
}
