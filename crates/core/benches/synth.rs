use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sound_core::apu::sid::{ChipModel, SidEngine, SidEngineKind};
use sound_core::apu::{ChipSynthesizer, RegisterWriteQueue, TiaSound};

const PAL_CLOCK: f64 = 985_248.0;
const PAL_FRAME_CYCLES: i64 = 19_656;

/// A held sawtooth on voice 1 with the filter engaged
fn sid_synth(kind: SidEngineKind) -> ChipSynthesizer<SidEngine> {
    let mut synth = ChipSynthesizer::new(
        SidEngine::open(kind, ChipModel::Mos6581, true),
        RegisterWriteQueue::default(),
    );
    synth.configure(44_100, PAL_CLOCK).unwrap();
    for (addr, val) in [
        (0x18u16, 0x1fu8),
        (0x17, 0xf1),
        (0x16, 0x40),
        (0x00, 0x00),
        (0x01, 0x1c),
        (0x05, 0x09),
        (0x06, 0xf0),
        (0x04, 0x21),
    ] {
        synth.set_register(addr, val, 0);
    }
    synth
}

fn bench_sid_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("sid_frame");

    for kind in [SidEngineKind::Fast, SidEngineKind::Cycle] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", kind)),
            &kind,
            |b, &kind| {
                let mut synth = sid_synth(kind);
                let mut buf = vec![0i16; 882];
                b.iter(|| {
                    synth.adjust_cycle_counter(-PAL_FRAME_CYCLES);
                    synth.render_samples(&mut buf);
                    black_box(buf[0]);
                });
            },
        );
    }

    group.finish();
}

fn bench_frame_with_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("fast_sid_writes_per_frame");

    for writes in [10i64, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(writes), writes, |b, &count| {
            let mut synth = sid_synth(SidEngineKind::Fast);
            let mut buf = vec![0i16; 882];
            let spacing = PAL_FRAME_CYCLES / count;
            b.iter(|| {
                for i in 0..count {
                    synth.set_register(0x01, i as u8, i * spacing);
                }
                synth.adjust_cycle_counter(-PAL_FRAME_CYCLES);
                synth.render_samples(&mut buf);
                black_box(buf[0]);
            });
        });
    }

    group.finish();
}

fn bench_tia_frame(c: &mut Criterion) {
    c.bench_function("tia_frame", |b| {
        let mut synth = ChipSynthesizer::new(TiaSound::new(1, 100), RegisterWriteQueue::default());
        synth.configure(44_100, 1_193_191.666_666_67).unwrap();
        synth.set_register(0x15, 0x04, 0);
        synth.set_register(0x17, 0x10, 0);
        synth.set_register(0x19, 0x0f, 0);
        let mut buf = vec![0i16; 736];
        b.iter(|| {
            synth.adjust_cycle_counter(-19_912);
            synth.render_samples(&mut buf);
            black_box(buf[0]);
        });
    });
}

criterion_group!(benches, bench_sid_frame, bench_frame_with_writes, bench_tia_frame);
criterion_main!(benches);
