use dt_bridge::codec::{decode_image, encode_image, encode_mask};
use dt_bridge::preview::decode_preview;
use dt_bridge::*;
use half::f16;
use rand::Rng;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let settings = BridgeSettings::default();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)))
        .init();

    println!("🖼️  Encoding hint and mask tensors");

    let mut rng = rand::thread_rng();
    let (h, w) = (96, 160);
    let data: Vec<f32> = (0..h * w * 3).map(|_| rng.gen::<f32>()).collect();
    let image = HostImage::new(1, h, w, 3, SampleRange::Unit, data)?;

    for control in [None, Some("depth"), Some("pose")] {
        let tensor = encode_image(&image, 0, 128, 128, control)?;
        let bytes = tensor.encode()?;
        let packed = tensor.encode_compressed()?;
        println!(
            "   {:<6} -> {}x{}x{} | raw {} bytes, compressed {} bytes",
            control.unwrap_or("image"),
            tensor.header.width,
            tensor.header.height,
            tensor.header.channels,
            bytes.len(),
            packed.len()
        );

        let decoded = decode_image(&packed)?;
        println!("          decoded back to {}x{} ({} channels)", decoded.width, decoded.height, decoded.channels);
    }

    let mask_data: Vec<f32> = (0..h * w).map(|i| if i % w < w / 2 { 0.0 } else { 1.0 }).collect();
    let mask = HostMask::new(1, h, w, mask_data)?;
    let tensor = encode_mask(&mask, 0, 128, 128)?;
    let regenerate = tensor.payload.iter().filter(|&&b| b == codec::MASK_REGENERATE).count();
    println!("\n🎭 Mask: {} of {} pixels regenerate", regenerate, tensor.payload.len());

    // Synthetic 16-channel latent, as a FLUX.1 engine would stream it
    let header = WireTensorHeader::new(TensorLayout::Nhwc, ElementType::F16, 32, 32, 16);
    let payload = (0..header.sample_count()?)
        .flat_map(|_| f16::from_f32(rng.gen_range(-1.0..1.0)).to_bits().to_le_bytes())
        .collect();
    let latent = WireTensor { header, payload }.encode()?;
    let preview = decode_preview(&latent, Some(ModelFamily::Flux1))?.fit_within(16);
    println!("\n👀 Preview: {}x{} RGBA", preview.width, preview.height);

    Ok(())
}
