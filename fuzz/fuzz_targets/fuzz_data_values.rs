#![no_main]
use libfuzzer_sys::fuzz_target;
use mmdb_reader::DataDecoder;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte picks a pointer base so pointers land in different places
    let base = data[0] as usize % data.len();
    let decoder = DataDecoder::new(data, base);

    let mut offset = 1;
    while offset < data.len() {
        match decoder.decode(offset) {
            Ok((value, next)) => {
                let _ = value.to_json();
                assert!(next > offset);
                offset = next;
            }
            Err(_) => break,
        }
    }
});
