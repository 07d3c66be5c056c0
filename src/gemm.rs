//! Row-major single precision GEMM on top of `matrixmultiply`.

use matrixmultiply::sgemm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trans {
    N,
    T,
}

/// `C = alpha * op(A) * op(B) + beta * C`, all buffers row-major.
///
/// `op(A)` is `m×k`, `op(B)` is `k×n` and `C` is `m×n`.
#[inline]
#[allow(clippy::too_many_arguments)]
pub fn sgemm_rowmajor(
    trans_a: Trans,
    trans_b: Trans,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    b: &[f32],
    beta: f32,
    c: &mut [f32],
) {
    assert!(a.len() >= m * k, "lhs buffer too small for {}x{}", m, k);
    assert!(b.len() >= k * n, "rhs buffer too small for {}x{}", k, n);
    assert!(c.len() >= m * n, "output buffer too small for {}x{}", m, n);

    let (a_rs, a_cs): (isize, isize) = match trans_a {
        Trans::N => (k as isize, 1),
        Trans::T => (1, m as isize),
    };
    let (b_rs, b_cs): (isize, isize) = match trans_b {
        Trans::N => (n as isize, 1),
        Trans::T => (1, k as isize),
    };
    let (c_rs, c_cs) = (n as isize, 1);

    // SAFETY: the asserts above guarantee every strided access stays in bounds.
    unsafe {
        sgemm(
            m,
            k,
            n,
            alpha,
            a.as_ptr(),
            a_rs,
            a_cs,
            b.as_ptr(),
            b_rs,
            b_cs,
            beta,
            c.as_mut_ptr(),
            c_rs,
            c_cs,
        );
    }
}

#[inline]
pub fn n() -> Trans {
    Trans::N
}

#[inline]
pub fn t() -> Trans {
    Trans::T
}
