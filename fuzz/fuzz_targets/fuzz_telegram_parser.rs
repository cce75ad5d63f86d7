#![no_main]

use dsmr_rs::p1::{P1TelegramParser, TelegramParser, TelegramReader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut parser = P1TelegramParser::new();
    for telegram in parser.parse(data) {
        // Objects always render back to text.
        for object in &telegram.objects {
            let _ = object.to_string();
        }
    }

    let mut reader = TelegramReader::plain(true);
    for chunk in data.chunks(17) {
        let _ = reader.feed(chunk);
    }
});
