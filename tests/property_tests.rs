use dt_bridge::codec::{decode_image, decode_samples, encode_image, encode_mask, MASK_REGENERATE, MASK_RETAIN};
use dt_bridge::{
    resolve, BridgeError, Capabilities, ElementType, HostImage, HostMask, ModelFamily, ModelProfile, ParamSet,
    SampleRange, TensorLayout, WireTensor, WireTensorHeader, HEADER_LEN,
};
use half::f16;
use proptest::prelude::*;
use serde_json::json;

fn layout() -> impl Strategy<Value = TensorLayout> {
    prop_oneof![
        Just(TensorLayout::Nchw),
        Just(TensorLayout::Nhwc),
        Just(TensorLayout::Chwn),
    ]
}

fn element_type() -> impl Strategy<Value = ElementType> {
    prop_oneof![Just(ElementType::U8), Just(ElementType::F16), Just(ElementType::F32)]
}

proptest! {
    #[test]
    fn header_round_trip(
        h in 1u32..4096,
        w in 1u32..4096,
        c in 1u32..64,
        layout in layout(),
        element_type in element_type(),
    ) {
        let header = WireTensorHeader::new(layout, element_type, h, w, c);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        prop_assert_eq!(buf.len(), HEADER_LEN);
        prop_assert_eq!(buf.len(), 68);

        let back = WireTensorHeader::read(&buf).unwrap();
        prop_assert_eq!(back, header);
        prop_assert_eq!((back.height, back.width, back.channels), (h, w, c));
    }

    #[test]
    fn image_round_trip_within_one_level(
        (h, w, c, data) in (1usize..12, 1usize..12, prop_oneof![Just(3usize), Just(4usize)])
            .prop_flat_map(|(h, w, c)| (Just(h), Just(w), Just(c), prop::collection::vec(any::<u8>(), h * w * c)))
    ) {
        let samples: Vec<f32> = data.iter().map(|&b| b as f32).collect();
        let image = HostImage::new(1, h, w, c, SampleRange::Byte, samples).unwrap();

        let bytes = encode_image(&image, 0, w as u32, h as u32, None).unwrap().encode().unwrap();
        let decoded = decode_image(&bytes).unwrap();

        prop_assert_eq!(decoded.channels as usize, c);
        prop_assert_eq!(decoded.data.len(), data.len());
        for (orig, back) in data.iter().zip(&decoded.data) {
            prop_assert!((*orig as i16 - *back as i16).abs() <= 1, "{} vs {}", orig, back);
        }
    }

    #[test]
    fn dimensions_truncate_to_64_pixel_units(width in 0i64..8192, height in 0i64..8192) {
        let params = ParamSet::new().with("width", width).with("height", height);
        let config = resolve(&params, Some("v1"));
        prop_assert_eq!(config.start_width, Some((width / 64) as u32));
        prop_assert_eq!(config.start_height, Some((height / 64) as u32));
        if width % 64 == 0 {
            prop_assert_eq!(config.width_px(), Some(width as u32));
        }
    }

    #[test]
    fn mask_quantization(intensity in any::<u8>()) {
        let mask = HostMask::new(1, 4, 4, vec![(intensity as f32 + 0.5) / 255.0; 16]).unwrap();
        let tensor = encode_mask(&mask, 0, 4, 4).unwrap();
        let expected = if intensity < 50 { MASK_RETAIN } else { MASK_REGENERATE };
        prop_assert!(tensor.payload.iter().all(|&b| b == expected));
        prop_assert_eq!(tensor.header.element_type, ElementType::U8);
        prop_assert_eq!(tensor.header.layout, TensorLayout::Nchw);
    }

    #[test]
    fn nan_first_sample_is_frame_local(h in 1u32..16, w in 1u32..16, rest in -1.0f32..1.0) {
        let header = WireTensorHeader::new(TensorLayout::Nhwc, ElementType::F16, h, w, 3);
        let payload: Vec<u8> = (0..header.sample_count().unwrap())
            .flat_map(|i| {
                let v = if i == 0 { f16::NAN } else { f16::from_f32(rest) };
                v.to_bits().to_le_bytes()
            })
            .collect();
        let bytes = WireTensor { header, payload }.encode().unwrap();

        let err = decode_samples(&bytes).unwrap_err();
        prop_assert!(matches!(err, BridgeError::CorruptFrame));
        prop_assert!(err.is_frame_local());
        prop_assert!(decode_image(&bytes).is_err());
    }

    #[test]
    fn capability_gating(idx in 0usize..24) {
        let family = ModelFamily::all()[idx];
        let params = ParamSet::from_json_str(&json!({
            "res_dpt_shift": true,
            "tea_cache": true,
            "tea_cache_start": 2,
            "tea_cache_threshold": 0.4,
            "separate_clip_l": true,
            "clip_l_text": "clip l",
            "separate_open_clip_g": true,
            "open_clip_g_text": "clip g",
            "num_frames": 33,
            "causal_inference": 5,
            "causal_inference_pad": 4,
            "fps": 6,
            "width": 1024,
            "height": 1024,
        }).to_string()).unwrap();

        let profile = ModelProfile::for_version(Some(family.tag()));
        let config = resolve(&params, Some(family.tag()));

        prop_assert_eq!(config.resolution_dependent_shift, profile.supports(Capabilities::RES_DPT_SHIFT));
        prop_assert_eq!(config.tea_cache.is_some(), profile.supports(Capabilities::TEA_CACHE));
        prop_assert_eq!(config.tea_cache_start.is_some(), profile.supports(Capabilities::TEA_CACHE));
        prop_assert_eq!(config.clip_l_text.is_some(), profile.supports(Capabilities::CLIP_L));
        prop_assert_eq!(config.open_clip_g_text.is_some(), profile.supports(Capabilities::OPEN_CLIP_G));
        prop_assert_eq!(config.num_frames.is_some(), profile.supports(Capabilities::VIDEO));
        prop_assert_eq!(config.fps_id.is_some(), profile.supports(Capabilities::SVD));
        prop_assert_eq!(config.original_image_width.is_some(), profile.supports(Capabilities::SDXL));

        if profile.supports(Capabilities::CAUSAL_INFERENCE) {
            prop_assert_eq!(config.causal_inference_enabled, Some(true));
            prop_assert_eq!(config.causal_inference, Some(2));
            prop_assert_eq!(config.causal_inference_pad, Some(1));
        } else {
            prop_assert_eq!(config.causal_inference_enabled, None);
            prop_assert_eq!(config.causal_inference, None);
            prop_assert_eq!(config.causal_inference_pad, None);
        }
    }
}

#[test]
fn white_image_encodes_to_ones() {
    let image = HostImage::filled(64, 128, &[255.0, 255.0, 255.0], SampleRange::Byte);
    let bytes = encode_image(&image, 0, 128, 64, None).unwrap().encode().unwrap();

    let words: Vec<u32> = bytes[..HEADER_LEN]
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    assert_eq!(words[6], 64);
    assert_eq!(words[7], 128);
    assert_eq!(words[8], 3);

    let payload = &bytes[HEADER_LEN..];
    assert_eq!(payload.len(), 64 * 128 * 3 * 2);
    assert!(payload
        .chunks_exact(2)
        .all(|s| f16::from_bits(u16::from_le_bytes([s[0], s[1]])) == f16::ONE));
}
