//! Test patterns written into buffer objects.

use anyhow::bail;
use anyhow::Context;
use zerocopy::AsBytes;

/// An XRGB8888 image of `tile` x `tile` squares, each with its own opaque color.
pub struct Checkerboard {
    pixels: Vec<u32>,
}

impl Checkerboard {
    pub fn new(width: u32, height: u32, tile: u32) -> anyhow::Result<Checkerboard> {
        if width == 0 || height == 0 || tile == 0 {
            bail!("checkerboard dimensions must be non-zero");
        }

        let tiles_x = width.div_ceil(tile);
        let Some(tiles) = tiles_x.checked_mul(height.div_ceil(tile)) else {
            bail!("too many {tile}x{tile} tiles in a {width}x{height} checkerboard");
        };
        let Some(pixel_count) = (width as usize).checked_mul(height as usize) else {
            bail!("{width}x{height} checkerboard does not fit in memory");
        };

        let mut colors: Vec<u32> = Vec::new();
        let mut pixels: Vec<u32> = Vec::new();
        colors
            .try_reserve_exact(tiles as usize)
            .and_then(|_| pixels.try_reserve_exact(pixel_count))
            .with_context(|| format!("failed to allocate a {width}x{height} checkerboard"))?;

        let mut rng = XorShift(0x2545_f491);
        colors.extend((0..tiles).map(|_| 0xff00_0000 | (rng.next() & 0x00ff_ffff)));

        for y in 0..height {
            for x in 0..width {
                pixels.push(colors[((y / tile) * tiles_x + x / tile) as usize]);
            }
        }

        Ok(Checkerboard { pixels })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.pixels.as_bytes()
    }
}

struct XorShift(u32);

impl XorShift {
    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiles_share_a_color() {
        let board = Checkerboard::new(8, 4, 4).unwrap();
        assert_eq!(board.as_bytes().len(), 8 * 4 * 4);

        let px = &board.pixels;
        assert_eq!(px[0], px[3]);
        assert_eq!(px[0], px[3 * 8 + 3]);
        assert_eq!(px[4], px[3 * 8 + 7]);
        assert_eq!(px[0] >> 24, 0xff);
    }

    #[test]
    fn partial_tiles_at_the_edges() {
        let board = Checkerboard::new(5, 3, 4).unwrap();
        assert_eq!(board.pixels.len(), 15);
        assert_eq!(board.pixels[0], board.pixels[2 * 5 + 3]);
    }

    #[test]
    fn oversized_pattern_is_rejected() {
        assert!(Checkerboard::new(u32::MAX, u32::MAX, 1).is_err());
        assert!(Checkerboard::new(u32::MAX, u32::MAX, u32::MAX).is_err());
    }

    #[test]
    fn zero_sized_pattern_is_rejected() {
        assert!(Checkerboard::new(0, 4, 4).is_err());
        assert!(Checkerboard::new(4, 4, 0).is_err());
    }
}
