//! Typed device words.
//!
//! Bridges fixed-width host types to the byte payloads of the wire. The
//! device interface copies payload bytes verbatim and applies the device's
//! configured byte order only at this typed boundary.

use crate::device::DeviceEndianness;

/// A fixed-width value storable in device memory.
pub trait Word: Copy + Default {
    /// Width in bytes.
    const SIZE: usize;

    /// Decode from device byte order. `bytes.len()` must equal `SIZE`.
    fn from_device_bytes(bytes: &[u8], endianness: DeviceEndianness) -> Self;

    /// Encode into device byte order. `out.len()` must equal `SIZE`.
    fn to_device_bytes(self, out: &mut [u8], endianness: DeviceEndianness);
}

macro_rules! impl_word {
    ($($word_type:ty),+ $(,)?) => {
        $(
            impl Word for $word_type {
                const SIZE: usize = std::mem::size_of::<$word_type>();

                fn from_device_bytes(bytes: &[u8], endianness: DeviceEndianness) -> Self {
                    let bytes = bytes.try_into().expect("caller sized the slice");
                    match endianness {
                        DeviceEndianness::Little => Self::from_le_bytes(bytes),
                        DeviceEndianness::Big => Self::from_be_bytes(bytes),
                    }
                }

                fn to_device_bytes(self, out: &mut [u8], endianness: DeviceEndianness) {
                    let bytes = match endianness {
                        DeviceEndianness::Little => self.to_le_bytes(),
                        DeviceEndianness::Big => self.to_be_bytes(),
                    };
                    out.copy_from_slice(&bytes);
                }
            }
        )+
    };
}

impl_word!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);
