use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub mod adapters;
pub mod codec;
pub mod compress;
pub mod dtype;
pub mod error;
pub mod family;
pub mod params;
pub mod preview;
pub mod request;
pub mod resolver;
pub mod schema;
pub mod session;
pub mod settings;

pub use codec::{DecodedImage, HostImage, HostMask, RawSamples, SampleRange};
pub use compress::COMPRESSED_MAGIC;
pub use dtype::{ElementType, StorageLocation, TensorLayout};
pub use error::{BridgeError, Result, TransportError};
pub use family::{Capabilities, ModelFamily, ModelProfile};
pub use params::ParamSet;
pub use preview::PreviewImage;
pub use resolver::resolve;
pub use schema::GenerationConfiguration;
pub use settings::BridgeSettings;

/// Number of little-endian u32 words in a tensor header
pub const HEADER_FIELDS: usize = 17;

/// Size in bytes of every tensor header
pub const HEADER_LEN: usize = HEADER_FIELDS * 4;

/// Fixed header preceding every tensor payload.
///
/// Word layout: `[0]` compression sentinel, `[1]` storage location,
/// `[2]` layout, `[3]` element type, `[4]` reserved, `[5]` batch,
/// `[6]` height, `[7]` width, `[8]` channels, `[9..17]` reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WireTensorHeader {
    pub compression: u32,
    pub storage: StorageLocation,
    pub layout: TensorLayout,
    pub element_type: ElementType,
    pub batch: u32,
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl WireTensorHeader {
    /// Header for an uncompressed host-memory tensor with a batch of one
    pub fn new(
        layout: TensorLayout,
        element_type: ElementType,
        height: u32,
        width: u32,
        channels: u32,
    ) -> Self {
        Self {
            compression: 0,
            storage: StorageLocation::Host,
            layout,
            element_type,
            batch: 1,
            height,
            width,
            channels,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compression == COMPRESSED_MAGIC
    }

    /// Number of samples described by the dimensions
    pub fn sample_count(&self) -> Result<usize> {
        [self.height, self.width, self.channels]
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
            .ok_or_else(|| {
                BridgeError::InvalidHeader(format!(
                    "dimensions {}x{}x{} overflow",
                    self.height, self.width, self.channels
                ))
            })
    }

    /// Uncompressed payload size in bytes
    pub fn payload_len(&self) -> Result<usize> {
        self.sample_count()?
            .checked_mul(self.element_type.size())
            .ok_or_else(|| BridgeError::InvalidHeader("payload size overflows".into()))
    }

    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u32::<LittleEndian>(self.compression)?;
        buf.write_u32::<LittleEndian>(self.storage as u32)?;
        buf.write_u32::<LittleEndian>(self.layout as u32)?;
        buf.write_u32::<LittleEndian>(self.element_type as u32)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.batch)?;
        buf.write_u32::<LittleEndian>(self.height)?;
        buf.write_u32::<LittleEndian>(self.width)?;
        buf.write_u32::<LittleEndian>(self.channels)?;
        for _ in 9..HEADER_FIELDS {
            buf.write_u32::<LittleEndian>(0)?;
        }
        Ok(())
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(BridgeError::Truncated {
                needed: HEADER_LEN,
                actual: data.len(),
            });
        }

        let mut cursor = Cursor::new(data);
        let mut words = [0u32; HEADER_FIELDS];
        cursor.read_u32_into::<LittleEndian>(&mut words)?;

        let storage = StorageLocation::from_u32(words[1])
            .ok_or_else(|| BridgeError::InvalidHeader(format!("storage flag {:#x}", words[1])))?;
        let layout = TensorLayout::from_u32(words[2])
            .ok_or_else(|| BridgeError::InvalidHeader(format!("layout flag {:#x}", words[2])))?;
        let element_type = ElementType::from_u32(words[3])
            .ok_or_else(|| BridgeError::InvalidHeader(format!("element type {:#x}", words[3])))?;

        Ok(Self {
            compression: words[0],
            storage,
            layout,
            element_type,
            batch: words[5],
            height: words[6],
            width: words[7],
            channels: words[8],
        })
    }
}

/// Header plus payload bytes
#[derive(Clone, Debug)]
pub struct WireTensor {
    pub header: WireTensorHeader,
    /// Raw samples, or a compressed block when `header.is_compressed()`
    pub payload: Vec<u8>,
}

impl WireTensor {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        self.header.write(&mut buf)?;
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Encode an f16 tensor with the payload replaced by a lossless fpzip block
    pub fn encode_compressed(&self) -> Result<Vec<u8>> {
        if self.header.element_type != ElementType::F16 {
            return Err(BridgeError::InvalidHeader(format!(
                "only f16 payloads compress, got {:?}",
                self.header.element_type
            )));
        }
        let raw = self.raw_payload()?;
        let block = compress::compress_payload(&raw, self.header.height, self.header.width, self.header.channels)?;
        let header = WireTensorHeader {
            compression: COMPRESSED_MAGIC,
            ..self.header
        };
        WireTensor {
            header,
            payload: block,
        }
        .encode()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = WireTensorHeader::read(data)?;
        let body = &data[HEADER_LEN..];

        let payload = if header.is_compressed() {
            body.to_vec()
        } else {
            let len = header.payload_len()?;
            if body.len() < len {
                return Err(BridgeError::Truncated {
                    needed: HEADER_LEN + len,
                    actual: data.len(),
                });
            }
            body[..len].to_vec()
        };

        Ok(WireTensor { header, payload })
    }

    /// Uncompressed payload, decompressing when necessary.
    ///
    /// A compressed block always decodes to f16 samples.
    pub fn raw_payload(&self) -> Result<Vec<u8>> {
        if !self.header.is_compressed() {
            return Ok(self.payload.clone());
        }
        compress::decompress_payload(&self.payload, self.header.sample_count()?)
    }
}
