#![no_main]
use libfuzzer_sys::fuzz_target;
use mmdb_reader::Reader;
use std::sync::OnceLock;

/// 0.0.0.0/1 -> {"ip": "low"}; the upper half misses
fn database() -> &'static Reader {
    static READER: OnceLock<Reader> = OnceLock::new();
    READER.get_or_init(|| {
        let mut data = Vec::new();
        data.extend_from_slice(&[0x00, 0x00, 0x11, 0x00, 0x00, 0x01]);
        data.extend_from_slice(&[0u8; 16]);
        data.extend_from_slice(&[0xE1, 0x42, b'i', b'p', 0x43, b'l', b'o', b'w']);
        data.extend_from_slice(b"\xAB\xCD\xEFMaxMind.com");
        data.push(0xE3);
        data.extend_from_slice(b"\x4Anode_count\xA1\x01");
        data.extend_from_slice(b"\x4Brecord_size\xA1\x18");
        data.extend_from_slice(b"\x4Aip_version\xA1\x04");
        Reader::from_bytes(data).unwrap()
    })
}

fuzz_target!(|data: &[u8]| {
    if let Ok(ip) = std::str::from_utf8(data) {
        let _ = database().get_with_prefix_len(ip);
    }
});
