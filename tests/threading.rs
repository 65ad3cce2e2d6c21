//! Every threading mode must produce the same pixels and the same bands.

mod common;

use common::test_stream::FrameSpec;
use common::{decode_planes, Bands};
use zenvp8::{CropRect, DecodeConfig, DecodingError, ThreadingMode, Vp8Decoder};

const MODES: [ThreadingMode; 3] = [
    ThreadingMode::None,
    ThreadingMode::FilterInWorker,
    ThreadingMode::ReconstructInWorker,
];

#[test]
fn test_modes_agree_on_pixels() {
    for seed in 0..8 {
        let mut spec = FrameSpec::random(112, 96, 200 + seed);
        spec.log2_partitions = (seed % 4) as u8;
        let data = spec.encode();
        let reference = decode_planes(&data, &DecodeConfig::default());
        for mode in &MODES[1..] {
            let config = DecodeConfig::default().threading(*mode).dithering_strength(70);
            let single = DecodeConfig::default().dithering_strength(70);
            assert_eq!(decode_planes(&data, &config), decode_planes(&data, &single), "seed {seed}");
            let config = DecodeConfig::default().threading(*mode);
            assert_eq!(decode_planes(&data, &config), reference, "seed {seed} {mode:?}");
        }
    }
}

#[test]
fn test_modes_agree_on_bands() {
    let mut spec = FrameSpec::random(40, 90, 5);
    spec.filter_level = 30;
    let data = spec.encode();
    let config = |mode| {
        DecodeConfig::default()
            .threading(mode)
            .crop(CropRect::new(2, 10, 30, 60))
    };
    let reference = Vp8Decoder::new(config(ThreadingMode::None))
        .decode(&data, Bands::default())
        .unwrap();
    for mode in &MODES[1..] {
        let sink = Vp8Decoder::new(config(*mode)).decode(&data, Bands::default()).unwrap();
        assert_eq!(sink.bands, reference.bands, "{mode:?}");
        assert_eq!(sink.luma, reference.luma, "{mode:?}");
        assert_eq!(sink.teardowns, 1);
    }
}

#[test]
fn test_abort_from_worker() {
    let data = FrameSpec::random(32, 128, 6).encode();
    for mode in MODES {
        let sink = Bands {
            reject_band: Some(1),
            ..Bands::default()
        };
        let err = Vp8Decoder::new(DecodeConfig::default().threading(mode))
            .decode(&data, sink)
            .unwrap_err();
        assert!(matches!(err, DecodingError::UserAbort(_)), "{mode:?}");
    }
}

#[test]
fn test_truncation_with_worker() {
    let data = FrameSpec::random(64, 64, 3).encode();
    for mode in MODES {
        let config = DecodeConfig::default().threading(mode);
        let err = zenvp8::decode_yuv420(&data[..data.len() * 3 / 4], &config).unwrap_err();
        assert!(matches!(err, DecodingError::NotEnoughData(_)), "{mode:?}");
    }
}
