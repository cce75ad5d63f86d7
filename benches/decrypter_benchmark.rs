use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dsmr_rs::p1::{FrameDecryptor, P1TelegramParser, SmartyKey, TelegramParser, TelegramReader};
use dsmr_rs::util::decode_hex;

const KEY: &str = "D491470F47126332B07D1923B3504188";

fn reference_frame() -> Vec<u8> {
    decode_hex(include_str!("../tests/data/smarty_frame.hex")).unwrap()
}

fn benchmark_decrypt_frame(c: &mut Criterion) {
    let key = SmartyKey::from_hex(KEY).unwrap();
    let frame = reference_frame();

    c.bench_function("decrypt_frame", |b| {
        let mut decryptor = FrameDecryptor::new(&key);
        b.iter(|| {
            let count = decryptor.feed(black_box(&frame)).count();
            black_box(count);
        })
    });

    c.bench_function("decrypt_frame_64_byte_chunks", |b| {
        let mut decryptor = FrameDecryptor::new(&key);
        b.iter(|| {
            for chunk in frame.chunks(64) {
                black_box(decryptor.feed(black_box(chunk)).count());
            }
        })
    });
}

fn benchmark_parse_telegram(c: &mut Criterion) {
    let telegram = include_bytes!("../tests/data/smarty_telegram.txt");

    c.bench_function("parse_telegram", |b| {
        let mut parser = P1TelegramParser::new();
        b.iter(|| black_box(parser.parse(black_box(telegram))))
    });
}

fn benchmark_reader_pipeline(c: &mut Criterion) {
    let key = SmartyKey::from_hex(KEY).unwrap();
    let frame = reference_frame();

    c.bench_function("encrypted_reader", |b| {
        let mut reader = TelegramReader::encrypted(&key, false);
        b.iter(|| black_box(reader.feed(black_box(&frame))))
    });
}

criterion_group!(
    benches,
    benchmark_decrypt_frame,
    benchmark_parse_telegram,
    benchmark_reader_pipeline
);
criterion_main!(benches);
