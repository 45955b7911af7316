//! Round-trip tests for the argument codec: whatever the encoder packs, the
//! paired decoder must render exactly as the formatting library would.

use deferlog::codec::{Arg, ArgPack, Cursor, StaticStr, MAX_STRING_LEN};
use deferlog::stage::OutputStage;

fn round_trip<P: ArgPack>(fmt: &'static str, pack: &P) -> String {
    let mut blob = vec![0u8; pack.encoded_size()];
    pack.encode(&mut blob);

    let mut stage = OutputStage::new(1024);
    let mut writer = stage.writer();
    let mut cursor = Cursor::new(&blob);
    P::decode_format(fmt, &mut cursor, &mut writer);

    let mut out = vec![0u8; blob.len() + fmt.len() + 64];
    let n = stage.read(&mut out);
    String::from_utf8(out[..n].to_vec()).unwrap()
}

#[test]
fn test_unsigned_integers() {
    assert_eq!(round_trip("{}", &(0u8,)), "0");
    assert_eq!(round_trip("{}", &(u16::MAX,)), format!("{}", u16::MAX));
    assert_eq!(round_trip("{}", &(123_456_789u32,)), "123456789");
    assert_eq!(round_trip("{}", &(u64::MAX,)), format!("{}", u64::MAX));
    assert_eq!(round_trip("{}", &(42usize,)), "42");
}

#[test]
fn test_signed_integers() {
    assert_eq!(round_trip("{}", &(-1i8,)), "-1");
    assert_eq!(round_trip("{}", &(i16::MIN,)), format!("{}", i16::MIN));
    assert_eq!(round_trip("{}", &(-123_456i32,)), "-123456");
    assert_eq!(round_trip("{}", &(i64::MIN,)), format!("{}", i64::MIN));
    assert_eq!(round_trip("{}", &(-7isize,)), "-7");
}

#[test]
fn test_floats() {
    assert_eq!(round_trip("{}", &(3.1415f64,)), format!("{}", 3.1415f64));
    assert_eq!(round_trip("{}", &(-0.5f32,)), format!("{}", -0.5f32));
    assert_eq!(round_trip("{}", &(f64::INFINITY,)), "inf");
}

#[test]
fn test_bool_and_char() {
    assert_eq!(round_trip("{} {}", &(true, false)), "true false");
    assert_eq!(round_trip("{}{}{}", &('a', 'é', '字')), "aé字");
}

#[test]
fn test_runtime_string_is_copied() {
    // The value is mutated after encoding; the record must hold the copy.
    let mut owned = String::from("before");
    let pack = (owned.as_str(),);
    let mut blob = vec![0u8; pack.encoded_size()];
    pack.encode(&mut blob);
    owned.clear();
    owned.push_str("after");

    let mut stage = OutputStage::new(256);
    let mut writer = stage.writer();
    let mut cursor = Cursor::new(&blob);
    <(&str,)>::decode_format("{}", &mut cursor, &mut writer);

    let mut out = [0u8; 64];
    let n = stage.read(&mut out);
    assert_eq!(&out[..n], b"before");
}

#[test]
fn test_owned_string_argument() {
    let value = String::from("owned value");
    assert_eq!(round_trip("v={}", &(value,)), "v=owned value");
}

#[test]
fn test_static_str_is_pointer_sized() {
    let pack = (StaticStr("a long static string that would be expensive to copy"),);
    assert_eq!(pack.encoded_size(), 10, "pointer encoding is length + address");
    assert_eq!(
        round_trip("{}", &pack),
        "a long static string that would be expensive to copy"
    );
}

#[test]
fn test_mixed_arguments() {
    let name = "test";
    let text = round_trip("pi={} name={}", &(3.1415f64, name));
    assert_eq!(text, "pi=3.1415 name=test");
}

#[test]
fn test_ten_arguments() {
    let text = round_trip(
        "{} {} {} {} {} {} {} {} {} {}",
        &(1u8, 2u16, 3u32, 4u64, 5i8, 6i16, 7i32, 8i64, 9usize, 10isize),
    );
    assert_eq!(text, "1 2 3 4 5 6 7 8 9 10");
}

#[test]
fn test_literal_text_around_placeholders() {
    assert_eq!(round_trip("no placeholders", &()), "no placeholders");
    assert_eq!(round_trip("[{}]", &(5u32,)), "[5]");
    assert_eq!(round_trip("{{}} and {}", &(1u8,)), "{} and 1");
}

#[test]
fn test_max_length_string_preserved_exactly() {
    let exact: String = "x".repeat(MAX_STRING_LEN);
    let text = round_trip("{}", &(exact.as_str(),));
    assert_eq!(text.len(), MAX_STRING_LEN);
    assert_eq!(text, exact);
}

#[test]
fn test_over_length_string_truncated() {
    let over: String = "y".repeat(MAX_STRING_LEN + 1);
    let pack = (over.as_str(),);
    assert_eq!(
        pack.encoded_size(),
        2 + MAX_STRING_LEN,
        "encoded size reflects the truncated payload"
    );

    let text = round_trip("{}", &pack);
    assert_eq!(text.len(), MAX_STRING_LEN);
    assert!(over.starts_with(&text));
}

#[test]
fn test_encoded_sizes_are_exact() {
    // The hot path trusts encoded_size to reserve exactly enough bytes.
    fn check<T: Arg>(value: T) {
        let size = value.encoded_size();
        let mut buf = vec![0u8; size];
        assert_eq!(value.encode(&mut buf), size);
    }

    check(0u8);
    check(u64::MAX);
    check(-1i64);
    check(2.718f64);
    check(true);
    check('z');
    check("plain string");
    check(String::from("owned"));
    check(StaticStr("static"));
}
