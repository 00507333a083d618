//! Grid atmosphere: a humidity field and a wind vector field, both evolved
//! by a random drift plus a separable Gaussian diffusion stencil.
//!
//! Runs every other tick. Evaporation and wind erosion read these fields
//! directly per cell. The blur uses reflecting boundaries, so diffusion
//! neither invents nor loses mass at the rim.

use ndarray::Array2;
use rand::Rng;

use crate::config::AtmosphereParams;
use crate::state::WorldState;

/// Normalized 1-D Gaussian taps for the separable blur.
pub fn gaussian_kernel(radius: usize, sigma: f32) -> Vec<f32> {
    let sigma = sigma.max(1e-3);
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    for i in 0..=2 * radius {
        let d = i as f32 - radius as f32;
        kernel.push((-0.5 * (d / sigma) * (d / sigma)).exp());
    }
    let sum: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Mirror an out-of-range index back into `[0, n)`.
#[inline]
fn reflect(mut i: i64, n: i64) -> usize {
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - 1 - i;
        } else {
            return i as usize;
        }
    }
}

/// Separable Gaussian blur with reflecting edges. Two passes through a
/// scratch buffer; the field is overwritten in place. Reflection keeps
/// the field's total invariant, which the humidity budget relies on.
pub fn gaussian_blur(field: &mut Array2<f32>, kernel: &[f32]) {
    let (width, height) = field.dim();
    let radius = kernel.len() / 2;
    let mut scratch = Array2::<f32>::zeros((width, height));

    // Horizontal pass.
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, &weight) in kernel.iter().enumerate() {
                let sx = reflect(x as i64 + k as i64 - radius as i64, width as i64);
                acc += field[[sx, y]] * weight;
            }
            scratch[[x, y]] = acc;
        }
    }
    // Vertical pass.
    for x in 0..width {
        for y in 0..height {
            let mut acc = 0.0;
            for (k, &weight) in kernel.iter().enumerate() {
                let sy = reflect(y as i64 + k as i64 - radius as i64, height as i64);
                acc += scratch[[x, sy]] * weight;
            }
            field[[x, y]] = acc;
        }
    }
}

/// One atmosphere update: humidity drift + heat bias + diffusion, then a
/// wind random walk + diffusion. All randomness comes from the seeded
/// state generator, cell-major, so runs replay exactly.
pub fn atmosphere_tick(state: &mut WorldState, params: &AtmosphereParams) {
    let width = state.grid.width;
    let height = state.grid.height;
    let kernel = gaussian_kernel(params.blur_radius, params.blur_sigma);

    // Drying bias grows as heat rises past the reference value.
    let heat_bias = (state.heat - 100) as f32 * params.heat_humidity_factor;

    for x in 0..width {
        for y in 0..height {
            let drift = if params.humidity_drift > 0.0 {
                state.rng.gen_range(-params.humidity_drift..=params.humidity_drift)
            } else {
                0.0
            };
            state.grid.humidity[[x, y]] += drift - heat_bias;
        }
    }
    gaussian_blur(&mut state.grid.humidity, &kernel);
    state.grid.humidity.mapv_inplace(|h| h.clamp(0.0, 1.0));

    for x in 0..width {
        for y in 0..height {
            let (dx, dy) = if params.wind_drift > 0.0 {
                (
                    state.rng.gen_range(-params.wind_drift..=params.wind_drift),
                    state.rng.gen_range(-params.wind_drift..=params.wind_drift),
                )
            } else {
                (0.0, 0.0)
            };
            state.grid.wind_x[[x, y]] += dx;
            state.grid.wind_y[[x, y]] += dy;
        }
    }
    gaussian_blur(&mut state.grid.wind_x, &kernel);
    gaussian_blur(&mut state.grid.wind_y, &kernel);
    let cap = params.wind_component_max;
    state.grid.wind_x.mapv_inplace(|w| w.clamp(-cap, cap));
    state.grid.wind_y.mapv_inplace(|w| w.clamp(-cap, cap));
}

/// Wind magnitude at a cell.
#[inline]
pub fn wind_speed(grid: &crate::grid::WorldGrid, x: usize, y: usize) -> f32 {
    let wx = grid.wind_x[[x, y]];
    let wy = grid.wind_y[[x, y]];
    (wx * wx + wy * wy).sqrt()
}
