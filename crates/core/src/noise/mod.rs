//! Deterministic 3D gradient noise.
//!
//! The lattice hash is a permutation table fixed at compile time, so
//! [`noise`] is a pure function: the same coordinates always produce the
//! bit-identical value, across calls and across runs.

const PERMUTATION_SEED: u32 = 0x5EED_F10E;

static PERMUTATION: [u8; 256] = build_permutation(PERMUTATION_SEED);

/// Fisher-Yates shuffle of `0..=255` driven by a 32-bit LCG.
const fn build_permutation(seed: u32) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = i as u8;
        i += 1;
    }

    let mut state = seed;
    let mut i = 255;
    while i > 0 {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let j = (state >> 8) as usize % (i + 1);
        let tmp = table[i];
        table[i] = table[j];
        table[j] = tmp;
        i -= 1;
    }
    table
}

#[inline]
fn hash(index: usize) -> usize {
    PERMUTATION[index & 255] as usize
}

/// Quintic fade `6t^5 - 15t^4 + 10t^3`.
#[inline]
fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[inline]
fn lerp(t: f32, a: f32, b: f32) -> f32 {
    a + t * (b - a)
}

/// Dot product with one of 16 gradient directions (12 cube-edge vectors,
/// four of them repeated).
#[inline]
fn grad(hash: usize, x: f32, y: f32, z: f32) -> f32 {
    let h = hash & 15;
    let u = if h < 8 { x } else { y };
    let v = if h < 4 {
        y
    } else if h == 12 || h == 14 {
        x
    } else {
        z
    };
    (if h & 1 == 0 { u } else { -u }) + (if h & 2 == 0 { v } else { -v })
}

/// Samples coherent noise at `(x, y, z)`. The result lies roughly in
/// [-1, 1] and is exactly zero on integer lattice points.
pub fn noise(x: f32, y: f32, z: f32) -> f32 {
    let (xf, yf, zf) = (x.floor(), y.floor(), z.floor());
    let xi = (xf as i64 & 255) as usize;
    let yi = (yf as i64 & 255) as usize;
    let zi = (zf as i64 & 255) as usize;
    let (x, y, z) = (x - xf, y - yf, z - zf);
    let (u, v, w) = (fade(x), fade(y), fade(z));

    let a = hash(xi) + yi;
    let aa = hash(a) + zi;
    let ab = hash(a + 1) + zi;
    let b = hash(xi + 1) + yi;
    let ba = hash(b) + zi;
    let bb = hash(b + 1) + zi;

    lerp(
        w,
        lerp(
            v,
            lerp(u, grad(hash(aa), x, y, z), grad(hash(ba), x - 1.0, y, z)),
            lerp(u, grad(hash(ab), x, y - 1.0, z), grad(hash(bb), x - 1.0, y - 1.0, z)),
        ),
        lerp(
            v,
            lerp(
                u,
                grad(hash(aa + 1), x, y, z - 1.0),
                grad(hash(ba + 1), x - 1.0, y, z - 1.0),
            ),
            lerp(
                u,
                grad(hash(ab + 1), x, y - 1.0, z - 1.0),
                grad(hash(bb + 1), x - 1.0, y - 1.0, z - 1.0),
            ),
        ),
    )
}
