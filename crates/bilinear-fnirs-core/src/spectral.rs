//! Spectral helpers
//!
//! FFT-based routines used by the noise injector: 1/f (pink) noise synthesis
//! by inverse FFT, and Fourier-domain resampling of recorded traces.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use rustfft::{num_complex::Complex, FftPlanner};

/// FFT planner wrapper shared by the spectral routines
pub struct Spectral {
    planner: FftPlanner<f64>,
}

impl Spectral {
    /// Create a spectral engine with an empty plan cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Inverse real FFT of a one-sided spectrum.
    ///
    /// `bins` holds frequencies `0..=N/2` of an `N = 2·(bins.len()-1)`
    /// point signal. The imaginary parts of the DC and Nyquist bins are
    /// ignored. Output is normalized by `1/N`.
    fn irfft(&mut self, bins: &[Complex<f64>]) -> Vec<f64> {
        if bins.len() < 2 {
            return bins.iter().map(|c| c.re).collect();
        }
        let n = 2 * (bins.len() - 1);
        let last = bins.len() - 1;

        let mut buffer = vec![Complex::new(0.0, 0.0); n];
        buffer[0] = Complex::new(bins[0].re, 0.0);
        buffer[last] = Complex::new(bins[last].re, 0.0);
        for k in 1..last {
            buffer[k] = bins[k];
            buffer[n - k] = bins[k].conj();
        }

        let ifft = self.planner.plan_fft_inverse(n);
        ifft.process(&mut buffer);

        let scale = 1.0 / n as f64;
        buffer.iter().map(|c| c.re * scale).collect()
    }

    /// Pink (1/f power) noise of length `n`.
    ///
    /// Draws `n/2 + 1 + (n mod 2)` complex Gaussian bins, divides bin `k` by
    /// `sqrt(k + 1)`, inverse-FFTs and trims to `n` samples.
    pub fn pink_noise<R: Rng + ?Sized>(&mut self, n: usize, rng: &mut R) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        let bins = n / 2 + 1 + n % 2;
        let spectrum: Vec<Complex<f64>> = (0..bins)
            .map(|k| {
                let re: f64 = StandardNormal.sample(rng);
                let im: f64 = StandardNormal.sample(rng);
                Complex::new(re, im) / ((k + 1) as f64).sqrt()
            })
            .collect();

        let mut samples = self.irfft(&spectrum);
        samples.truncate(n);
        samples
    }

    /// Resample `signal` to `num` samples in the Fourier domain.
    ///
    /// Keeps the lowest `min(num, len)` frequencies. When that count is even
    /// the Nyquist bin is split in two on upsampling and folded together on
    /// downsampling, so a band-limited signal survives the round trip. An
    /// empty input yields `num` zeros.
    pub fn resample(&mut self, signal: &[f64], num: usize) -> Vec<f64> {
        let nx = signal.len();
        if num == 0 {
            return Vec::new();
        }
        if nx == 0 {
            return vec![0.0; num];
        }
        if nx == num {
            return signal.to_vec();
        }

        let mut x: Vec<Complex<f64>> = signal.iter().map(|&v| Complex::new(v, 0.0)).collect();
        self.planner.plan_fft_forward(nx).process(&mut x);

        let n = num.min(nx);
        let nyq = n / 2 + 1;
        let mut y = vec![Complex::new(0.0, 0.0); num];
        y[..nyq].copy_from_slice(&x[..nyq]);
        if n > 2 {
            let tail = n - nyq;
            y[num - tail..].copy_from_slice(&x[nx - tail..]);
        }

        if n % 2 == 0 {
            let half = n / 2;
            if num < nx {
                y[num - half] += x[nx - half];
            } else {
                y[half] *= 0.5;
                y[num - half] = y[half];
            }
        }

        self.planner.plan_fft_inverse(num).process(&mut y);

        let scale = 1.0 / nx as f64;
        y.iter().map(|c| c.re * scale).collect()
    }
}

impl Default for Spectral {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Spectral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spectral").finish_non_exhaustive()
    }
}

/// Population standard deviation
#[must_use]
pub fn standard_deviation(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    (samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}
