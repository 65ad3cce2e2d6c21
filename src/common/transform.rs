//! Inverse transforms that add their residual straight into the work buffer.

use super::prediction::BPS;

/// 16 bit fixed point version of cos(PI/8) * sqrt(2) - 1
const CONST1: i32 = 20091;
/// 16 bit fixed point version of sin(PI/8) * sqrt(2)
const CONST2: i32 = 35468;

#[inline(always)]
fn mul1(a: i32) -> i32 {
    ((a * CONST1) >> 16) + a
}

#[inline(always)]
fn mul2(a: i32) -> i32 {
    (a * CONST2) >> 16
}

#[inline(always)]
fn store(buf: &mut [u8], pos: usize, v: i32) {
    buf[pos] = (i32::from(buf[pos]) + (v >> 3)).clamp(0, 255) as u8;
}

/// Full inverse DCT of one 4x4 block, added to the prediction at `off`.
pub(crate) fn transform_one(coeffs: &[i16], buf: &mut [u8], off: usize) {
    // Perform one length check up front to avoid subsequent bounds checks in this function
    let coeffs = &coeffs[..16];
    let fetch = |idx: usize| i32::from(coeffs[idx]);

    // vertical pass, stored transposed
    let mut tmp = [0i32; 16];
    for i in 0..4 {
        let a = fetch(i) + fetch(8 + i);
        let b = fetch(i) - fetch(8 + i);
        let c = mul2(fetch(4 + i)) - mul1(fetch(12 + i));
        let d = mul1(fetch(4 + i)) + mul2(fetch(12 + i));
        tmp[4 * i] = a + d;
        tmp[4 * i + 1] = b + c;
        tmp[4 * i + 2] = b - c;
        tmp[4 * i + 3] = a - d;
    }

    // horizontal pass
    for i in 0..4 {
        let dc = tmp[i] + 4;
        let a = dc + tmp[8 + i];
        let b = dc - tmp[8 + i];
        let c = mul2(tmp[4 + i]) - mul1(tmp[12 + i]);
        let d = mul1(tmp[4 + i]) + mul2(tmp[12 + i]);
        let row = off + i * BPS;
        store(buf, row, a + d);
        store(buf, row + 1, b + c);
        store(buf, row + 2, b - c);
        store(buf, row + 3, a - d);
    }
}

/// Inverse DCT of a block whose only non-zero coefficients are 0, 1 and 4.
pub(crate) fn transform_ac3(coeffs: &[i16], buf: &mut [u8], off: usize) {
    let a = i32::from(coeffs[0]) + 4;
    let c4 = mul2(i32::from(coeffs[4]));
    let d4 = mul1(i32::from(coeffs[4]));
    let c1 = mul2(i32::from(coeffs[1]));
    let d1 = mul1(i32::from(coeffs[1]));
    for (y, dc) in [a + d4, a + c4, a - c4, a - d4].into_iter().enumerate() {
        let row = off + y * BPS;
        store(buf, row, dc + d1);
        store(buf, row + 1, dc + c1);
        store(buf, row + 2, dc - c1);
        store(buf, row + 3, dc - d1);
    }
}

/// DC-only inverse transform: adds `(DC + 4) >> 3` to all 16 samples.
pub(crate) fn transform_dc(coeffs: &[i16], buf: &mut [u8], off: usize) {
    let dc = i32::from(coeffs[0]) + 4;
    for y in 0..4 {
        for x in 0..4 {
            store(buf, off + y * BPS + x, dc);
        }
    }
}

/// Adds the residual of one luma subblock according to its 2-bit
/// coefficient class: 3 is a full block, 2 has at most three low
/// coefficients, 1 is DC only and 0 has nothing to add.
pub(crate) fn transform_by_class(class: u32, coeffs: &[i16], buf: &mut [u8], off: usize) {
    match class {
        3 => transform_one(coeffs, buf, off),
        2 => transform_ac3(coeffs, buf, off),
        1 => transform_dc(coeffs, buf, off),
        _ => {}
    }
}

/// Adds the residual of the four 4x4 blocks of one chroma plane.
///
/// `bits` holds the 2-bit classes of the four blocks in its low byte.
pub(crate) fn transform_uv(bits: u32, coeffs: &[i16], buf: &mut [u8], off: usize) {
    if bits & 0xff == 0 {
        return;
    }
    let offsets = [off, off + 4, off + 4 * BPS, off + 4 * BPS + 4];
    if bits & 0xaa != 0 {
        for (n, &dst) in offsets.iter().enumerate() {
            transform_one(&coeffs[n * 16..], buf, dst);
        }
    } else {
        for (n, &dst) in offsets.iter().enumerate() {
            if coeffs[n * 16] != 0 {
                transform_dc(&coeffs[n * 16..], buf, dst);
            }
        }
    }
}

// 14.3 inverse walsh-hadamard transform, used in decoding
//
// Scatters the 16 luma DC values into coefficient 0 of each of the 16
// luma blocks in `out`.
pub(crate) fn iwht4x4(input: &[i16; 16], out: &mut [i16]) {
    let mut tmp = [0i32; 16];
    for i in 0..4 {
        let a0 = i32::from(input[i]) + i32::from(input[12 + i]);
        let a1 = i32::from(input[4 + i]) + i32::from(input[8 + i]);
        let a2 = i32::from(input[4 + i]) - i32::from(input[8 + i]);
        let a3 = i32::from(input[i]) - i32::from(input[12 + i]);
        tmp[i] = a0 + a1;
        tmp[8 + i] = a0 - a1;
        tmp[4 + i] = a3 + a2;
        tmp[12 + i] = a3 - a2;
    }

    for (i, row) in tmp.chunks_exact(4).enumerate() {
        let dc = row[0] + 3;
        let a0 = dc + row[3];
        let a1 = row[1] + row[2];
        let a2 = row[1] - row[2];
        let a3 = dc - row[3];
        let base = i * 64;
        out[base] = ((a0 + a1) >> 3) as i16;
        out[base + 16] = ((a3 + a2) >> 3) as i16;
        out[base + 32] = ((a0 - a1) >> 3) as i16;
        out[base + 48] = ((a3 - a2) >> 3) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8) -> Vec<u8> {
        vec![value; BPS * 4]
    }

    #[test]
    fn test_dc_matches_full_transform() {
        for dc in [-600i16, -9, 0, 3, 4, 12, 700] {
            let mut coeffs = [0i16; 16];
            coeffs[0] = dc;
            let mut a = flat(100);
            let mut b = flat(100);
            transform_one(&coeffs, &mut a, 0);
            transform_dc(&coeffs, &mut b, 0);
            assert_eq!(a, b, "dc {dc}");
        }
    }

    #[test]
    fn test_ac3_matches_full_transform() {
        let mut coeffs = [0i16; 16];
        coeffs[0] = 90;
        coeffs[1] = -37;
        coeffs[4] = 55;
        let mut a = flat(128);
        let mut b = flat(128);
        transform_one(&coeffs, &mut a, 0);
        transform_ac3(&coeffs, &mut b, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_transform_clamps() {
        let mut coeffs = [0i16; 16];
        coeffs[0] = 2000;
        let mut buf = flat(250);
        transform_one(&coeffs, &mut buf, 0);
        assert!(buf[..4].iter().all(|&v| v == 255));
    }

    #[test]
    fn test_uv_dc_skips_zero_blocks() {
        let mut coeffs = [0i16; 64];
        coeffs[16] = 80;
        let mut buf = vec![50u8; BPS * 8];
        transform_uv(1 << 2, &coeffs, &mut buf, 0);
        assert_eq!(buf[0], 50);
        assert_eq!(buf[4], 60);
        assert_eq!(buf[4 * BPS], 50);
    }

    #[test]
    fn test_iwht_dc_only() {
        let mut input = [0i16; 16];
        input[0] = 80;
        let mut out = [0i16; 256];
        iwht4x4(&input, &mut out);
        for n in 0..16 {
            assert_eq!(out[n * 16], (80 + 3) >> 3);
        }
    }
}
