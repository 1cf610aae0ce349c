/// Element types understood by the engine's tensor header
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElementType {
    U8 = 0x01000,
    I32 = 0x02000,
    F32 = 0x04000,
    I64 = 0x08000,
    F64 = 0x10000,
    F16 = 0x20000,
    /// Catch-all for quantized weights (one byte or less per element)
    Qx = 0x40000,
    Bf16 = 0x80000,
}

impl ElementType {
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            0x01000 => Some(ElementType::U8),
            0x02000 => Some(ElementType::I32),
            0x04000 => Some(ElementType::F32),
            0x08000 => Some(ElementType::I64),
            0x10000 => Some(ElementType::F64),
            0x20000 => Some(ElementType::F16),
            0x40000 => Some(ElementType::Qx),
            0x80000 => Some(ElementType::Bf16),
            _ => None,
        }
    }

    /// Bytes per element in an uncompressed payload
    pub fn size(self) -> usize {
        match self {
            ElementType::U8 | ElementType::Qx => 1,
            ElementType::F16 | ElementType::Bf16 => 2,
            ElementType::I32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::F64 => 8,
        }
    }
}

/// Memory layout of a tensor payload
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TensorLayout {
    /// Channel-first
    Nchw = 0x01,
    /// Channel-last, row-major with channels fastest
    Nhwc = 0x02,
    /// Batch-last
    Chwn = 0x04,
}

impl TensorLayout {
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            0x01 => Some(TensorLayout::Nchw),
            0x02 => Some(TensorLayout::Nhwc),
            0x04 => Some(TensorLayout::Chwn),
            _ => None,
        }
    }
}

/// Where the tensor lives on the engine side
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    Host = 0x1,
    Device = 0x2,
}

impl StorageLocation {
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            0x1 => Some(StorageLocation::Host),
            0x2 => Some(StorageLocation::Device),
            _ => None,
        }
    }
}
