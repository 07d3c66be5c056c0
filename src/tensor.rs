use crate::gemm::{n, sgemm_rowmajor, t};
use rand::distributions::{Distribution, Uniform};
use smallvec::SmallVec;

/// Dense row-major `f32` tensor.
///
/// Owns its buffer, so `clone()` is a full deep copy. Layers rely on that
/// when a model tree is duplicated.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    pub(crate) shape: SmallVec<[usize; 4]>,
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("numel", &self.data.len())
            .finish()
    }
}

impl Tensor {
    pub fn new(data: Vec<f32>, shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "Data length {} does not match shape {:?}",
            data.len(),
            shape
        );
        Tensor {
            data,
            shape: shape.iter().cloned().collect(),
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        let numel = shape.iter().product();
        Tensor::new(vec![0.0; numel], shape)
    }

    pub fn scalar(value: f32) -> Self {
        Tensor::new(vec![value], &[1])
    }

    /// Create a random tensor with values from normal distribution
    pub fn randn(shape: &[usize]) -> Tensor {
        use rand_distr::StandardNormal;
        let mut rng = rand::thread_rng();

        let size: usize = shape.iter().product();
        let data: Vec<f32> = (0..size).map(|_| StandardNormal.sample(&mut rng)).collect();

        Tensor::new(data, shape)
    }

    /// Uniform samples in `[-bound, bound]`
    pub fn uniform(shape: &[usize], bound: f32) -> Tensor {
        let dist = Uniform::new_inclusive(-bound, bound);
        let mut rng = rand::thread_rng();

        let size: usize = shape.iter().product();
        let data: Vec<f32> = (0..size).map(|_| dist.sample(&mut rng)).collect();

        Tensor::new(data, shape)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Apply `f` element-wise, keeping the shape.
    pub fn map<F: Fn(f32) -> f32>(&self, f: F) -> Tensor {
        Tensor::new(self.data.iter().map(|&x| f(x)).collect(), &self.shape)
    }

    /// Same buffer, new shape with equal element count.
    pub fn reshape(&self, shape: &[usize]) -> Tensor {
        Tensor::new(self.data.clone(), shape)
    }

    /// Largest absolute finite value, `0.0` for an empty or all non-finite tensor.
    pub fn abs_max(&self) -> f32 {
        self.data
            .iter()
            .filter(|v| v.is_finite())
            .fold(0.0f32, |acc, &v| acc.max(v.abs()))
    }

    /// Transpose a 2D tensor
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.shape.len(), 2, "Can only transpose 2D tensors");

        let rows = self.shape[0];
        let cols = self.shape[1];

        let mut result = vec![0.0; self.data.len()];
        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }

        Tensor::new(result, &[cols, rows])
    }

    /// `[m, k] @ [k, n] -> [m, n]`
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape.len(), 2, "First tensor must be 2D");
        assert_eq!(other.shape.len(), 2, "Second tensor must be 2D");

        let (m, k) = (self.shape[0], self.shape[1]);
        let n_cols = other.shape[1];
        assert_eq!(
            k, other.shape[0],
            "Inner dimensions must match: {}x{} @ {}x{}",
            m, k, other.shape[0], n_cols
        );

        let mut result = vec![0.0f32; m * n_cols];
        sgemm_rowmajor(n(), n(), m, n_cols, k, 1.0, &self.data, &other.data, 0.0, &mut result);
        Tensor::new(result, &[m, n_cols])
    }

    /// `[m, k] @ [n, k]ᵀ -> [m, n]` without materializing the transpose.
    pub fn matmul_t(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape.len(), 2, "First tensor must be 2D");
        assert_eq!(other.shape.len(), 2, "Second tensor must be 2D");

        let (m, k) = (self.shape[0], self.shape[1]);
        let n_rows = other.shape[0];
        assert_eq!(
            k, other.shape[1],
            "Inner dimensions must match: {}x{} @ ({}x{})ᵀ",
            m, k, n_rows, other.shape[1]
        );

        let mut result = vec![0.0f32; m * n_rows];
        sgemm_rowmajor(n(), t(), m, n_rows, k, 1.0, &self.data, &other.data, 0.0, &mut result);
        Tensor::new(result, &[m, n_rows])
    }

    /// Supports adding [batch, features] + [features] -> [batch, features]
    pub fn add_broadcast(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            let data = self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| a + b)
                .collect();
            return Tensor::new(data, &self.shape);
        }

        assert!(
            self.shape.len() == 2 && other.shape.len() == 1,
            "Unsupported broadcasting shapes: {:?} and {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Last dimension must match for broadcasting"
        );

        let features = self.shape[1];
        let mut result = self.data.clone();
        for (idx, value) in result.iter_mut().enumerate() {
            *value += other.data[idx % features];
        }
        Tensor::new(result, &self.shape)
    }

    pub fn relu(&self) -> Tensor {
        self.map(|x| x.max(0.0))
    }

    pub fn sigmoid(&self) -> Tensor {
        self.map(|x| 1.0 / (1.0 + (-x).exp()))
    }

    /// 2D convolution over `[batch, in_ch, h, w]` with weight `[out_ch, in_ch, kh, kw]`.
    ///
    /// Lowered to im2col + GEMM per sample.
    pub fn conv2d(
        &self,
        weight: &Tensor,
        bias: Option<&Tensor>,
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Tensor {
        assert_eq!(self.shape.len(), 4, "conv2d input must be [N, C, H, W]");
        assert_eq!(weight.shape.len(), 4, "conv2d weight must be [O, C, KH, KW]");

        let (batch, in_ch, h, w) = (self.shape[0], self.shape[1], self.shape[2], self.shape[3]);
        let (out_ch, w_in_ch, kh, kw) = (
            weight.shape[0],
            weight.shape[1],
            weight.shape[2],
            weight.shape[3],
        );
        assert_eq!(in_ch, w_in_ch, "conv2d channel mismatch");
        assert!(
            h + 2 * padding.0 >= kh && w + 2 * padding.1 >= kw,
            "conv2d kernel larger than padded input"
        );

        let out_h = (h + 2 * padding.0 - kh) / stride.0 + 1;
        let out_w = (w + 2 * padding.1 - kw) / stride.1 + 1;
        let patch = in_ch * kh * kw;
        let positions = out_h * out_w;

        let mut output = vec![0.0f32; batch * out_ch * positions];
        let mut cols = vec![0.0f32; patch * positions];

        for b in 0..batch {
            let sample = &self.data[b * in_ch * h * w..(b + 1) * in_ch * h * w];

            for c in 0..in_ch {
                for ky in 0..kh {
                    for kx in 0..kw {
                        let row = (c * kh + ky) * kw + kx;
                        for oy in 0..out_h {
                            for ox in 0..out_w {
                                let iy = (oy * stride.0 + ky) as isize - padding.0 as isize;
                                let ix = (ox * stride.1 + kx) as isize - padding.1 as isize;
                                let in_bounds =
                                    iy >= 0 && ix >= 0 && (iy as usize) < h && (ix as usize) < w;
                                cols[row * positions + oy * out_w + ox] = if in_bounds {
                                    sample[(c * h + iy as usize) * w + ix as usize]
                                } else {
                                    0.0
                                };
                            }
                        }
                    }
                }
            }

            let out_slice = &mut output[b * out_ch * positions..(b + 1) * out_ch * positions];
            sgemm_rowmajor(
                n(),
                n(),
                out_ch,
                positions,
                patch,
                1.0,
                &weight.data,
                &cols,
                0.0,
                out_slice,
            );

            if let Some(bias) = bias {
                for (o, chunk) in out_slice.chunks_mut(positions).enumerate() {
                    for v in chunk.iter_mut() {
                        *v += bias.data[o];
                    }
                }
            }
        }

        Tensor::new(output, &[batch, out_ch, out_h, out_w])
    }
}
