#![no_main]

use carbon_vep::codec::VepDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Whole-buffer decode must never panic, whatever the bytes.
    let _ = carbon_vep::codec::decode(data);

    // The incremental decoder must behave the same under the worst
    // chunking the transport can produce. Use the first byte to pick a
    // chunk size so the corpus explores different fragmentations.
    let chunk = data.first().copied().unwrap_or(1).max(1) as usize;
    let mut decoder = VepDecoder::new();
    for piece in data.chunks(chunk) {
        decoder.feed(piece);
        loop {
            match decoder.next() {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
    }
});
