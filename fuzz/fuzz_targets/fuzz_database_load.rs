#![no_main]
use libfuzzer_sys::fuzz_target;
use mmdb_reader::Reader;

fuzz_target!(|data: &[u8]| {
    // Garbage input must produce errors, never panics
    if let Ok(reader) = Reader::from_bytes(data.to_vec()) {
        for ip in ["1.1.1.1", "255.255.255.255", "::", "2001:db8::1", "::ffff:10.0.0.1"] {
            let _ = reader.get_with_prefix_len(ip);
        }
    }
});
