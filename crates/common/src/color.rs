//! Color representation and manipulation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// RGBA color with 8-bit components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    #[inline]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create color from floating point components (0.0 - 1.0).
    pub fn from_f32(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            r: (r.clamp(0.0, 1.0) * 255.0).round() as u8,
            g: (g.clamp(0.0, 1.0) * 255.0).round() as u8,
            b: (b.clamp(0.0, 1.0) * 255.0).round() as u8,
            a: (a.clamp(0.0, 1.0) * 255.0).round() as u8,
        }
    }

    /// Convert to f32 array for GPU upload.
    #[inline]
    pub fn to_f32_array(&self) -> [f32; 4] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
            self.a as f32 / 255.0,
        ]
    }

    /// Scale the alpha channel by a factor in 0.0 - 1.0.
    #[inline]
    pub fn with_alpha_scaled(&self, factor: f32) -> Color {
        Color::rgba(
            self.r,
            self.g,
            self.b,
            (self.a as f32 * factor.clamp(0.0, 1.0)).round() as u8,
        )
    }

    /// Blend this color over a background using source-over compositing.
    pub fn blend_over(&self, background: Color) -> Color {
        let fg_a = self.a as f32 / 255.0;
        let bg_a = background.a as f32 / 255.0;

        let out_a = fg_a + bg_a * (1.0 - fg_a);

        if out_a == 0.0 {
            return Color::TRANSPARENT;
        }

        let blend = |fg: u8, bg: u8| -> u8 {
            let fg = fg as f32 / 255.0;
            let bg = bg as f32 / 255.0;
            let out = (fg * fg_a + bg * bg_a * (1.0 - fg_a)) / out_a;
            (out * 255.0).round() as u8
        };

        Color::rgba(
            blend(self.r, background.r),
            blend(self.g, background.g),
            blend(self.b, background.b),
            (out_a * 255.0).round() as u8,
        )
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

/// A 4x4 color matrix applied to RGBA channels.
///
/// Rows map output channels; `m[row]` dotted with the input `(r, g, b, a)`
/// vector (normalized to 0.0 - 1.0) produces one output channel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorMatrix {
    pub m: [[f32; 4]; 4],
}

impl ColorMatrix {
    pub const IDENTITY: ColorMatrix = ColorMatrix {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    /// Luma-weighted grayscale conversion.
    pub fn grayscale() -> Self {
        let l = [0.2126, 0.7152, 0.0722, 0.0];
        Self {
            m: [l, l, l, [0.0, 0.0, 0.0, 1.0]],
        }
    }

    /// Uniform channel scaling (alpha untouched).
    pub fn tint(r: f32, g: f32, b: f32) -> Self {
        Self {
            m: [
                [r, 0.0, 0.0, 0.0],
                [0.0, g, 0.0, 0.0],
                [0.0, 0.0, b, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    pub fn is_identity(&self) -> bool {
        for row in 0..4 {
            for col in 0..4 {
                let expected = if row == col { 1.0 } else { 0.0 };
                if (self.m[row][col] - expected).abs() > f32::EPSILON {
                    return false;
                }
            }
        }
        true
    }

    /// Apply the matrix to a color.
    pub fn apply(&self, color: Color) -> Color {
        let input = color.to_f32_array();
        let mut out = [0.0f32; 4];
        for (row, channel) in out.iter_mut().enumerate() {
            *channel = self.m[row][0] * input[0]
                + self.m[row][1] * input[1]
                + self.m[row][2] * input[2]
                + self.m[row][3] * input[3];
        }
        Color::from_f32(out[0], out[1], out[2], out[3])
    }

    /// Row-major array form for GPU upload.
    #[inline]
    pub fn to_rows_array(&self) -> [[f32; 4]; 4] {
        self.m
    }
}

impl Default for ColorMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_over_opaque() {
        let fg = Color::rgba(255, 0, 0, 128);
        let bg = Color::WHITE;
        let out = fg.blend_over(bg);
        assert_eq!(out.a, 255);
        assert!(out.r > 250);
        assert!((out.g as i32 - 127).abs() <= 2);
    }

    #[test]
    fn test_color_matrix_identity() {
        assert!(ColorMatrix::IDENTITY.is_identity());
        assert!(!ColorMatrix::grayscale().is_identity());

        let c = Color::rgba(10, 200, 30, 255);
        assert_eq!(ColorMatrix::IDENTITY.apply(c), c);
    }

    #[test]
    fn test_color_matrix_grayscale() {
        let c = Color::rgb(255, 255, 255);
        let g = ColorMatrix::grayscale().apply(c);
        assert_eq!(g.a, 255);
        assert_eq!(g.r, g.g);
        assert_eq!(g.g, g.b);
    }
}
