// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};

pub use glam::{Vec2, Vec3};

/// Frames before the animation counter wraps.
pub const ANIMATION_PERIOD: u32 = 1000;

/// Per-draw push block shared by the vertex and fragment stages.
///
/// Mirrors `layout(push_constant) uniform Push { vec2 offset; vec3 color; }`:
/// `color` is vec3-aligned to byte 16 and the block rounds up to 32 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    pub offset: Vec2,
    _pad0: [f32; 2],
    pub color: Vec3,
    _pad1: f32,
}

impl PushConstants {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn new(offset: Vec2, color: Vec3) -> Self {
        Self {
            offset,
            color,
            ..Self::zeroed()
        }
    }

    /// Block for copy `row` of the demo stack at animation step `frame`.
    /// Copies drift right with time and step down per row, getting bluer.
    pub fn stacked(frame: u32, row: u32) -> Self {
        let frame = (frame % ANIMATION_PERIOD) as f32;
        let row = row as f32;
        Self::new(
            Vec2::new(0.5 + frame * 0.005, -0.5 * row * 0.25),
            Vec3::new(0.0, 0.0, 0.2 + 0.2 * row),
        )
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_glsl_push_block() {
        assert_eq!(PushConstants::SIZE, 32);
        let p = PushConstants::new(Vec2::new(1.0, 2.0), Vec3::new(3.0, 4.0, 5.0));
        let floats: &[f32] = bytemuck::cast_slice(p.as_bytes());
        assert_eq!(&floats[0..2], &[1.0, 2.0]);
        // color starts at byte 16
        assert_eq!(&floats[4..7], &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn stacked_rows_step_down_and_brighten() {
        let first = PushConstants::stacked(0, 0);
        let third = PushConstants::stacked(0, 2);
        assert_eq!(first.offset, Vec2::new(0.5, 0.0));
        assert_eq!(third.offset.y, -0.25);
        assert!(third.color.z > first.color.z);
    }

    #[test]
    fn animation_wraps() {
        assert_eq!(
            PushConstants::stacked(ANIMATION_PERIOD + 3, 1),
            PushConstants::stacked(3, 1)
        );
    }
}
