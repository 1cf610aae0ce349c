use dt_bridge::request::build_override;
use dt_bridge::*;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let settings = BridgeSettings::default();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)))
        .init();

    println!("🧭 Resolving a generation configuration");

    let version = std::env::args().nth(1).unwrap_or_else(|| "wan_v2.1_14b".to_string());
    let params = ParamSet::from_json_str(
        r#"{
            "model": "wan_v2.1_14b_t2v_q6p_svd.ckpt",
            "model_info": {"file": "wan_v2.1_14b_t2v_q6p_svd.ckpt", "version": "wan_v2.1_14b"},
            "width": 832,
            "height": 480,
            "seed": -1,
            "steps": 30,
            "cfg": 5.0,
            "sampler_name": "Euler A Trailing",
            "seed_mode": "ScaleAlike",
            "num_frames": 81,
            "causal_inference": 9,
            "causal_inference_pad": 8,
            "tea_cache": true,
            "tea_cache_threshold": 0.3,
            "lora": [{"model": {"file": "wan_motion.safetensors"}, "weight": 0.7}]
        }"#,
    )?;

    let profile = ModelProfile::for_version(Some(version.as_str()));
    println!("📐 Family: {:?}", profile.family);
    println!("   Capabilities: {:?}", profile.capabilities);

    let config = resolve(&params, Some(version.as_str()));
    println!("\n✅ Resolved:");
    println!("   Size: {:?} x {:?} px", config.width_px(), config.height_px());
    println!("   Seed: {:?}  Sampler: {:?}", config.seed, config.sampler);
    println!("   Frames: {:?}", config.num_frames);
    println!(
        "   Causal inference: {:?} (window {:?}, pad {:?})",
        config.causal_inference_enabled, config.causal_inference, config.causal_inference_pad
    );
    println!("   Tea cache: {:?} (threshold {:?})", config.tea_cache, config.tea_cache_threshold);
    println!("   LoRAs: {}", config.loras.len());

    let bytes = config.to_bytes();
    println!("\n📦 Encoded configuration: {} bytes", bytes.len());

    let meta = build_override(&params)?;
    if let Some(models) = meta.models {
        println!("   Model override: {}", String::from_utf8_lossy(&models));
    }

    Ok(())
}
