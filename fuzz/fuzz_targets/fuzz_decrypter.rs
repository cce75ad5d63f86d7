#![no_main]

use dsmr_rs::p1::{FrameDecryptor, SmartyKey};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(key) = SmartyKey::from_bytes(&[0x42; 16]) else {
        return;
    };

    // The whole input in one chunk.
    let mut decryptor = FrameDecryptor::new(&key);
    for result in decryptor.feed(data) {
        let _ = result;
    }

    // Split at a point chosen by the input; must not panic either way.
    if let Some((&split, rest)) = data.split_first() {
        let at = split as usize % (rest.len() + 1);
        let mut decryptor = FrameDecryptor::new(&key);
        let _ = decryptor.feed(&rest[..at]).count();
        let _ = decryptor.feed(&rest[at..]).count();
        decryptor.reset();
        assert_eq!(decryptor.buffered_len(), 0);
    }
});
