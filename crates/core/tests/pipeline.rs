use sound_core::apu::sid::cycle::CycleSid;
use sound_core::apu::sid::fast::FastSid;
use sound_core::apu::sid::passthrough::{CaptureSink, PassthroughSid};
use sound_core::apu::sid::{AdsrState, ChipModel, SidEngine, SidEngineKind};
use sound_core::apu::tia::{AUDC0, AUDV0};
use sound_core::apu::{
    AudioChip, ChipSynthesizer, FramePacer, MachineTiming, OverflowPolicy, RegisterWriteQueue,
    TiaSound, TimingMode,
};
use sound_core::config::SoundConfig;

fn peak(buf: &[i16]) -> i32 {
    buf.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0)
}

/// Run `frames` video frames, feeding `writes` (cycle within the frame,
/// address, value) at the start of each, the way a machine would.
fn run_frames<C: AudioChip>(
    synth: &mut ChipSynthesizer<C>,
    timing: MachineTiming,
    frames: usize,
    mut writes: impl FnMut(usize) -> Vec<(i64, u16, u8)>,
) -> Vec<i16> {
    let mut pacer = FramePacer::new(timing, synth.sample_rate());
    let mut out = Vec::new();
    for frame in 0..frames {
        for (cycle, addr, val) in writes(frame) {
            synth.set_register(addr, val, cycle);
        }
        synth.adjust_cycle_counter(-(timing.cycles_per_frame as i64));
        let mut buf = vec![0i16; pacer.next_frame() * synth.channels()];
        synth.render_samples(&mut buf);
        out.extend_from_slice(&buf);
    }
    out
}

fn sawtooth_setup() -> Vec<(i64, u16, u8)> {
    vec![
        (0, 0x18, 0x0f),
        (10, 0x01, 0x10),
        (20, 0x05, 0x00),
        (30, 0x06, 0xf0),
        (40, 0x04, 0x21),
    ]
}

#[test]
fn test_frame_loop_sample_total_matches_rate() {
    let timing = MachineTiming::c64(TimingMode::Pal);
    let mut synth = ChipSynthesizer::new(FastSid::new(ChipModel::Mos6581, true), RegisterWriteQueue::default());
    synth.configure(44_100, timing.clock_hz).unwrap();

    let out = run_frames(&mut synth, timing, 100, |f| if f == 0 { sawtooth_setup() } else { vec![] });
    let exact = 100.0 * timing.samples_per_frame(44_100);
    assert!((out.len() as f64 - exact).abs() < 1.0);
    assert!(synth.queue().is_empty());
}

#[test]
fn test_write_at_frame_end_lands_in_next_frame() {
    let timing = MachineTiming::atari2600(TimingMode::Pal);
    let mut synth = ChipSynthesizer::new(TiaSound::new(1, 100), RegisterWriteQueue::default());
    synth.configure(44_100, timing.clock_hz).unwrap();

    // 884.46 samples per frame; the pacer hands out 884, so a write 12
    // cycles before the frame end falls just past the first buffer
    let mut pacer = FramePacer::new(timing, 44_100);
    synth.set_register(AUDC0, 0x00, 0);
    synth.set_register(AUDV0, 0x08, 23_700);
    synth.adjust_cycle_counter(-(timing.cycles_per_frame as i64));
    let mut first = vec![0i16; pacer.next_frame()];
    synth.render_samples(&mut first);
    assert_eq!(first.len(), 884);
    assert!(first.iter().all(|&s| s == 0));
    assert_eq!(synth.queue().len(), 1);

    // 612 cycles after the carried write: 22.8 samples further on
    synth.set_register(AUDV0, 0x0f, 600);
    synth.adjust_cycle_counter(-(timing.cycles_per_frame as i64));
    let mut second = vec![0i16; pacer.next_frame()];
    synth.render_samples(&mut second);
    assert!(second[..22].iter().all(|&s| s == 8 << 10));
    assert!(second[22..].iter().all(|&s| s == 15 << 10));
    assert!(synth.queue().is_empty());
}

#[test]
fn test_fast_and_cycle_engines_both_sound() {
    let timing = MachineTiming::c64(TimingMode::Pal);
    for kind in [SidEngineKind::Fast, SidEngineKind::Cycle] {
        let mut synth = ChipSynthesizer::new(
            SidEngine::open(kind, ChipModel::Mos8580, false),
            RegisterWriteQueue::default(),
        );
        synth.configure(44_100, timing.clock_hz).unwrap();
        let out = run_frames(&mut synth, timing, 10, |f| if f == 0 { sawtooth_setup() } else { vec![] });
        assert!(peak(&out[4410..]) > 1000, "{:?} engine silent", kind);
    }
}

#[test]
fn test_gate_off_releases_envelope() {
    let timing = MachineTiming::c64(TimingMode::Pal);
    let mut synth = ChipSynthesizer::new(CycleSid::new(ChipModel::Mos8580, true), RegisterWriteQueue::default());
    synth.configure(44_100, timing.clock_hz).unwrap();

    run_frames(&mut synth, timing, 60, |f| match f {
        0 => sawtooth_setup(),
        // Fast release
        5 => vec![(0, 0x06, 0xf0), (100, 0x04, 0x20)],
        _ => vec![],
    });
    let (state, level) = synth.chip().envelope(0);
    assert_eq!(state, AdsrState::Idle);
    assert_eq!(level, 0);
}

#[test]
fn test_overflow_drops_excess_writes() {
    let config = SoundConfig::from_json_str(r#"{"queue_capacity": 8}"#).unwrap();
    let mut synth = ChipSynthesizer::new(config.sid.open_engine(), config.queue());
    synth.configure(config.sample_rate, 985_248.0).unwrap();
    for i in 0..20 {
        synth.set_register(0x01, i, i as i64);
    }
    assert_eq!(synth.queue().len(), 8);
    assert_eq!(synth.queue().dropped(), 12);
}

#[test]
fn test_grow_policy_keeps_writes() {
    let queue = RegisterWriteQueue::with_policy(4, OverflowPolicy::Grow { max_capacity: 64 });
    let mut synth = ChipSynthesizer::new(FastSid::new(ChipModel::Mos6581, true), queue);
    synth.configure(44_100, 985_248.0).unwrap();
    for i in 0..20 {
        synth.set_register(0x01, i, i as i64);
    }
    assert_eq!(synth.queue().len(), 20);
    assert_eq!(synth.queue().dropped(), 0);
}

#[test]
fn test_passthrough_forwards_writes_in_order() {
    let timing = MachineTiming::c64(TimingMode::Pal);
    let mut synth = ChipSynthesizer::new(PassthroughSid::new(CaptureSink::new()), RegisterWriteQueue::default());
    synth.configure(44_100, timing.clock_hz).unwrap();

    let out = run_frames(&mut synth, timing, 2, |f| if f == 0 { sawtooth_setup() } else { vec![] });
    assert!(out.iter().all(|&s| s == 0));

    let writes = synth.chip().sink().writes();
    let order: Vec<(u8, u8)> = writes.iter().map(|w| (w.addr, w.value)).collect();
    assert_eq!(order, vec![(0x18, 0x0f), (0x01, 0x10), (0x05, 0x00), (0x06, 0xf0), (0x04, 0x21)]);
    assert!(writes.windows(2).all(|w| w[0].cycle <= w[1].cycle));
}

#[test]
fn test_save_state_resumes_identically() {
    let timing = MachineTiming::c64(TimingMode::Pal);
    let mut a = ChipSynthesizer::new(
        SidEngine::open(SidEngineKind::Cycle, ChipModel::Mos6581, true),
        RegisterWriteQueue::default(),
    );
    a.configure(44_100, timing.clock_hz).unwrap();
    run_frames(&mut a, timing, 3, |f| if f == 0 { sawtooth_setup() } else { vec![] });

    let state = a.save_state();
    let mut b = ChipSynthesizer::new(
        SidEngine::open(SidEngineKind::Cycle, ChipModel::Mos6581, true),
        RegisterWriteQueue::default(),
    );
    b.load_state(&state).unwrap();
    assert!(b.is_configured());

    let out_a = run_frames(&mut a, timing, 3, |_| vec![(500, 0x01, 0x30)]);
    let out_b = run_frames(&mut b, timing, 3, |_| vec![(500, 0x01, 0x30)]);
    assert_eq!(out_a, out_b);
}
