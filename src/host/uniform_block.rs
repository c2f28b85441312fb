//! Byte-level storage for a program's uniform buffers.
//!
//! Values are written at the offsets naga reflected, so reading a block back
//! yields what a GPU would see, including vec4 packing of float arrays.

use crate::host::UniformValue;
use crate::host::validation::{UniformField, UniformFieldKind, UniformLayout};

#[derive(Clone, Debug, Default)]
pub struct UniformBlocks {
    blocks: Vec<Vec<u8>>,
}

impl UniformBlocks {
    /// Zero-initialised storage for every block of `layout`.
    pub fn for_layout(layout: &UniformLayout) -> Self {
        Self {
            blocks: layout
                .blocks
                .iter()
                .map(|b| vec![0_u8; b.size as usize])
                .collect(),
        }
    }

    /// Store `value` into `field`. Returns `false` (and writes nothing) when
    /// the value does not match the field's declared type.
    pub fn write(&mut self, field: &UniformField, value: &UniformValue) -> bool {
        let Some(dst) = self.blocks.get_mut(field.block) else {
            return false;
        };
        let base = field.offset as usize;
        match (field.kind, value) {
            (UniformFieldKind::Float, UniformValue::Float(v)) => write_f32(dst, base, *v),
            (UniformFieldKind::Int, UniformValue::Int(v)) => write_i32(dst, base, *v),
            (UniformFieldKind::Vec2, UniformValue::Vec2([x, y])) => {
                write_f32(dst, base, *x);
                write_f32(dst, base + 4, *y);
            }
            (UniformFieldKind::PackedFloatArray { vec4_count, stride }, UniformValue::FloatArray(values)) => {
                let capacity = vec4_count as usize * 4;
                for (i, v) in values.iter().take(capacity).enumerate() {
                    write_f32(dst, packed_offset(base, stride, i), *v);
                }
            }
            _ => return false,
        }
        true
    }

    pub fn read(&self, field: &UniformField) -> Option<UniformValue> {
        let src = self.blocks.get(field.block)?;
        let base = field.offset as usize;
        Some(match field.kind {
            UniformFieldKind::Float => UniformValue::Float(read_f32(src, base)),
            UniformFieldKind::Int => UniformValue::Int(read_i32(src, base)),
            UniformFieldKind::Vec2 => UniformValue::Vec2([read_f32(src, base), read_f32(src, base + 4)]),
            UniformFieldKind::PackedFloatArray { vec4_count, stride } => UniformValue::FloatArray(
                (0..vec4_count as usize * 4)
                    .map(|i| read_f32(src, packed_offset(base, stride, i)))
                    .collect(),
            ),
        })
    }

    pub fn bytes(&self, block: usize) -> Option<&[u8]> {
        self.blocks.get(block).map(Vec::as_slice)
    }
}

/// Element `i` of a float array stored as `array<vec4f, N>`.
fn packed_offset(base: usize, stride: u32, i: usize) -> usize {
    base + (i / 4) * stride as usize + (i % 4) * 4
}

fn write_f32(dst: &mut [u8], at: usize, v: f32) {
    dst[at..at + 4].copy_from_slice(bytemuck::bytes_of(&v));
}

fn write_i32(dst: &mut [u8], at: usize, v: i32) {
    dst[at..at + 4].copy_from_slice(bytemuck::bytes_of(&v));
}

fn read_f32(src: &[u8], at: usize) -> f32 {
    bytemuck::pod_read_unaligned(&src[at..at + 4])
}

fn read_i32(src: &[u8], at: usize) -> i32 {
    bytemuck::pod_read_unaligned(&src[at..at + 4])
}
