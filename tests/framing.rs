use vigil::Error;
use vigil::msg::{HEADER_LEN, MsgBuf, ReadCursor, WriteCursor};

#[test]
fn alloc_writes_a_little_endian_last_fragment_header() {
    let m = MsgBuf::alloc(12);
    assert_eq!(m.len(), 12);
    assert_eq!(m.raw().len(), HEADER_LEN + 12);

    let header = u32::from_le_bytes(m.raw()[..HEADER_LEN].try_into().unwrap());
    assert_eq!(header, 12 | 0x8000_0000, "length plus last-fragment bit");
    assert!(m.data().iter().all(|&b| b == 0), "payload starts zeroed");
}

#[test]
fn put_get_round_trip_with_padding() {
    let mut m = MsgBuf::alloc(4);
    let mut w = WriteCursor::new(m.data_mut());
    w.put_bytes(&[0x01, 0x02, 0x03]);
    assert_eq!(w.pos(), 4, "cursor advanced past the pad byte");

    let mut r = ReadCursor::new(m.data());
    let mut out = [0u8; 3];
    r.get_bytes(&mut out).expect("well-formed read");
    assert_eq!(out, [0x01, 0x02, 0x03]);
    assert_eq!(r.pos(), 4);
    assert_eq!(r.remaining(), 0);
}

#[test]
fn word_sized_runs_take_no_padding() {
    let mut buf = [0u8; 8];
    let mut w = WriteCursor::new(&mut buf);
    w.put_bytes(&[1, 2, 3, 4]);
    assert_eq!(w.pos(), 4);
    w.put_bytes(&[]);
    assert_eq!(w.pos(), 4, "empty run writes nothing");

    let mut r = ReadCursor::new(&buf);
    let mut out = [0u8; 4];
    r.get_bytes(&mut out).expect("aligned read");
    assert_eq!(out, [1, 2, 3, 4]);
    assert_eq!(r.pos(), 4);
}

#[test]
fn non_zero_padding_is_rejected() {
    let mut buf = [0u8; 4];
    WriteCursor::new(&mut buf).put_bytes(&[1, 2, 3]);
    buf[3] = 0x01;

    let mut r = ReadCursor::new(&buf);
    let mut out = [0u8; 3];
    let err = r.get_bytes(&mut out).unwrap_err();
    assert!(matches!(err, Error::ShouldBeZero), "got {err}");
    assert_eq!(r.pos(), 0, "cursor did not advance past the bad pad");
}

#[test]
fn reading_past_the_buffer_fails() {
    let buf = [0u8; 4];

    let mut r = ReadCursor::new(&buf);
    let mut out = [0u8; 5];
    let err = r.get_bytes(&mut out).unwrap_err();
    assert!(matches!(err, Error::Overrun), "got {err}");

    let mut out = [0u8; 2];
    r.get_bytes(&mut out).expect("padded run still fits");
    assert_eq!(r.pos(), 4);
}

#[test]
fn payload_streams_through_a_record_buffer() {
    let mut m = MsgBuf::alloc(12);
    let mut w = WriteCursor::new(m.data_mut());
    w.put_bytes(b"call");
    w.put_bytes(b"reply");
    assert_eq!(w.pos(), 12, "4 + (5 padded to 8)");

    let mut r = ReadCursor::new(m.data());
    let mut verb = [0u8; 4];
    let mut body = [0u8; 5];
    r.get_bytes(&mut verb).expect("first run");
    r.get_bytes(&mut body).expect("second run");
    assert_eq!(&verb, b"call");
    assert_eq!(&body, b"reply");
    assert_eq!(r.remaining(), 0);
}

#[test]
#[should_panic(expected = "out of range")]
fn oversized_records_are_a_programming_error() {
    MsgBuf::alloc(0x8000_0000);
}
