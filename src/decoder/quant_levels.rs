//! Smoothing of quantized alpha levels.
//!
//! An encoder may reduce the alpha plane to a handful of levels before
//! compressing it. Each sample strictly between the lowest and highest
//! level is pulled towards the box average of its neighbourhood, by at
//! most three quarters of the smallest gap between two levels, so the
//! staircase of a gradient flattens out while real edges survive.

use alloc::vec;
use alloc::vec::Vec;

/// Fixed-point precision of the box normalization.
const FIX: u32 = 16;
/// Extra precision of the averages and of the correction table index.
const LFIX: u32 = 2;
const LUT_SIZE: usize = (1 << (8 + LFIX)) - 1;

/// Smooths the `width` x `height` plane in place.
///
/// `strength` 0..=100 maps to a box radius of 0..=4, shrunk to fit the
/// plane. Planes with two or fewer distinct levels are left alone. The
/// box trails the output by `radius` rows and is never pushed past the
/// last row, so the bottom `radius` rows keep their levels.
pub(crate) fn dequantize_levels(plane: &mut [u8], width: usize, height: usize, strength: u8) {
    let mut radius = 4 * usize::from(strength.min(100)) / 100;
    if 2 * radius + 1 > width {
        radius = width.saturating_sub(1) >> 1;
    }
    if 2 * radius + 1 > height {
        radius = height.saturating_sub(1) >> 1;
    }
    let Some(plane) = plane.get_mut(..width * height) else {
        return;
    };
    if radius == 0 {
        return;
    }
    let Some(levels) = Levels::count(plane) else {
        return;
    };
    let correction = correction_table(levels.min_dist);
    let mut boxes = BoxFilter::new(width, radius);

    // Rows above the plane replicate the first row. Source row `k` is
    // read before output row `k - radius` is written, so the filter can
    // run in place.
    let r = radius as isize;
    for k in -r..height as isize {
        let src = k.max(0) as usize;
        boxes.push_row(&plane[src * width..][..width]);
        if k >= r {
            let y = (k - r) as usize;
            let average = boxes.average_row();
            let row = &mut plane[y * width..][..width];
            for (v, &avg) in row.iter_mut().zip(average) {
                if *v > levels.min && *v < levels.max {
                    let delta = i32::from(avg) - (i32::from(*v) << LFIX);
                    let fix = correction[(LUT_SIZE as i32 + delta) as usize];
                    *v = (i32::from(*v) + i32::from(fix)).clamp(0, 255) as u8;
                }
            }
        }
    }
}

struct Levels {
    min: u8,
    max: u8,
    /// Smallest distance between two levels in use.
    min_dist: i32,
}

impl Levels {
    fn count(plane: &[u8]) -> Option<Self> {
        let mut used = [false; 256];
        for &v in plane {
            used[usize::from(v)] = true;
        }
        let mut levels = used.iter().enumerate().filter(|&(_, &u)| u).map(|(v, _)| v as i32);
        let first = levels.next()?;
        let (mut count, mut last, mut min_dist) = (1, first, i32::MAX);
        for v in levels {
            count += 1;
            min_dist = min_dist.min(v - last);
            last = v;
        }
        (count > 2).then_some(Self {
            min: first as u8,
            max: last as u8,
            min_dist,
        })
    }
}

/// Correction for a sample that differs from its neighbourhood average by
/// `i - LUT_SIZE` (in `LFIX` units), in whole levels.
///
/// The full difference is applied up to three quarters of `min_dist`, then
/// tapers linearly to zero at `min_dist`.
fn correction_table(min_dist: i32) -> Vec<i16> {
    let threshold1 = min_dist << LFIX;
    let threshold2 = (3 * threshold1) >> 2;
    let taper = threshold1 - threshold2;
    let mut lut = vec![0i16; 2 * LUT_SIZE + 1];
    for i in 1..=LUT_SIZE {
        let d = i as i32;
        let c = if d <= threshold2 {
            d
        } else if d < threshold1 {
            threshold2 * (threshold1 - d) / taper
        } else {
            0
        };
        let c = c >> LFIX;
        lut[LUT_SIZE + i] = c as i16;
        lut[LUT_SIZE - i] = -c as i16;
    }
    lut
}

/// Running `(2r+1)`-square box sums over the rows pushed so far.
///
/// All sums are kept modulo 2^16. A box never holds more than
/// `81 * 255` so the differences come out exact.
struct BoxFilter {
    width: usize,
    radius: usize,
    scale: u32,
    /// `2r+1` rows of two-dimensional prefix sums.
    ring: Vec<u16>,
    prev: usize,
    next: usize,
    /// Vertical box sums of the horizontal prefix sums of the latest row.
    column: Vec<u16>,
    average: Vec<u16>,
}

impl BoxFilter {
    fn new(width: usize, radius: usize) -> Self {
        let size = 2 * radius + 1;
        Self {
            width,
            radius,
            scale: (1 << (FIX + LFIX)) / (size * size) as u32,
            ring: vec![0; size * width],
            prev: size - 1,
            next: 0,
            column: vec![0; width],
            average: vec![0; width],
        }
    }

    fn push_row(&mut self, src: &[u8]) {
        let (prev, cur) = (self.prev * self.width, self.next * self.width);
        let mut sum = 0u16;
        for (x, &v) in src.iter().enumerate() {
            sum = sum.wrapping_add(u16::from(v));
            let value = self.ring[prev + x].wrapping_add(sum);
            self.column[x] = value.wrapping_sub(self.ring[cur + x]);
            self.ring[cur + x] = value;
        }
        self.prev = self.next;
        self.next = (self.next + 1) % (2 * self.radius + 1);
    }

    /// Box averages of the latest row, in `LFIX` units. Columns outside
    /// the plane mirror the edge columns.
    fn average_row(&mut self) -> &[u16] {
        let (w, r) = (self.width, self.radius);
        let col = &self.column;
        for x in 0..w {
            let sum = if x <= r {
                col[x + r - 1].wrapping_add(col[r - x])
            } else if x < w - r {
                col[x + r].wrapping_sub(col[x - r - 1])
            } else {
                col[w - 1]
                    .wrapping_mul(2)
                    .wrapping_sub(col[2 * w - 2 - r - x])
                    .wrapping_sub(col[x - r - 1])
            };
            self.average[x] = ((u32::from(sum) * self.scale) >> FIX) as u16;
        }
        &self.average
    }
}
