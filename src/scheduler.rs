//! Denoising step schedulers.
//!
//! Two schedulers are supported, selected exhaustively by the pipeline:
//!
//! - [`DpmSolverMultistepScheduler`]: DPM-Solver++ second-order multistep
//!   solver, the default sampler.
//! - [`LcmScheduler`]: latent-consistency sampler used together with merged
//!   consistency LoRA weights for few-step generation.
//!
//! Both predict noise (epsilon parameterization) and operate on a discrete
//! training schedule derived from a beta schedule.

use crate::utils::SeededRng;
use candle_core::{DType, Result, Tensor};
use serde::Deserialize;

/// How betas progress over the training schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSchedule {
    Linear,
    ScaledLinear,
}

/// How inference timesteps are spread over the training schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestepSpacing {
    Linspace,
    Leading,
    Trailing,
}

/// Common interface the pipeline drives a scheduler through.
pub trait NoiseScheduler {
    /// Prepare the inference schedule. Resets any multistep state.
    fn set_timesteps(&mut self, num_inference_steps: usize) -> Result<()>;

    /// Inference timesteps in descending order.
    fn timesteps(&self) -> &[usize];

    /// One reverse-diffusion step: predicted noise + current sample ->
    /// previous sample. `rng` feeds samplers that inject noise between steps;
    /// deterministic solvers ignore it.
    fn step(
        &mut self,
        model_output: &Tensor,
        timestep: usize,
        sample: &Tensor,
        rng: &mut SeededRng,
    ) -> Result<Tensor>;
}

fn compute_betas(
    schedule: BetaSchedule,
    beta_start: f64,
    beta_end: f64,
    num_train_timesteps: usize,
) -> Vec<f64> {
    let n = num_train_timesteps;
    match schedule {
        BetaSchedule::Linear => (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                beta_start + t * (beta_end - beta_start)
            })
            .collect(),
        BetaSchedule::ScaledLinear => {
            let start = beta_start.sqrt();
            let end = beta_end.sqrt();
            (0..n)
                .map(|i| {
                    let t = i as f64 / (n - 1) as f64;
                    let b = start + t * (end - start);
                    b * b
                })
                .collect()
        }
    }
}

fn alphas_cumprod(betas: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(betas.len());
    let mut cumprod = 1.0;
    for beta in betas {
        cumprod *= 1.0 - beta;
        out.push(cumprod);
    }
    out
}

/// Spread `num_inference_steps` timesteps over `[0, num_train_timesteps)`
/// in descending order.
fn spread_timesteps(
    spacing: TimestepSpacing,
    num_train_timesteps: usize,
    num_inference_steps: usize,
    steps_offset: usize,
) -> Vec<usize> {
    let n = num_train_timesteps;
    let steps = num_inference_steps;
    match spacing {
        TimestepSpacing::Linspace => {
            // n_steps + 1 evenly spaced points over [0, n-1]; drop the
            // terminal 0 after reversing
            let points = steps + 1;
            let mut ts: Vec<usize> = (0..points)
                .map(|i| {
                    let t = i as f64 / (points - 1) as f64;
                    (t * (n - 1) as f64).round() as usize
                })
                .collect();
            ts.reverse();
            ts.truncate(steps);
            ts
        }
        TimestepSpacing::Leading => {
            let step_ratio = n / steps;
            (0..steps)
                .map(|i| (i * step_ratio + steps_offset).min(n - 1))
                .rev()
                .collect()
        }
        TimestepSpacing::Trailing => {
            let step_ratio = n as f64 / steps as f64;
            (1..=steps)
                .map(|i| ((n as f64 - (steps - i) as f64 * step_ratio).round() as usize)
                    .saturating_sub(1))
                .rev()
                .collect()
        }
    }
}

// =============================================================================
// DPM-Solver++ multistep
// =============================================================================

/// Configuration for the multistep solver, deserializable from a diffusers
/// `scheduler_config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct DpmSolverConfig {
    #[serde(default = "default_num_train_timesteps")]
    pub num_train_timesteps: usize,
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,
    #[serde(default = "default_beta_end")]
    pub beta_end: f64,
    #[serde(default = "default_beta_schedule")]
    pub beta_schedule: BetaSchedule,
    #[serde(default = "default_solver_order")]
    pub solver_order: usize,
    #[serde(default)]
    pub clip_sample: bool,
    #[serde(default = "default_clip_sample_range")]
    pub clip_sample_range: f64,
    #[serde(default = "default_timestep_spacing")]
    pub timestep_spacing: TimestepSpacing,
    #[serde(default)]
    pub steps_offset: usize,
}

fn default_num_train_timesteps() -> usize {
    1000
}
fn default_beta_start() -> f64 {
    0.00085
}
fn default_beta_end() -> f64 {
    0.012
}
fn default_beta_schedule() -> BetaSchedule {
    BetaSchedule::ScaledLinear
}
fn default_solver_order() -> usize {
    2
}
fn default_clip_sample_range() -> f64 {
    1.0
}
fn default_timestep_spacing() -> TimestepSpacing {
    TimestepSpacing::Leading
}

impl Default for DpmSolverConfig {
    fn default() -> Self {
        Self {
            num_train_timesteps: 1000,
            beta_start: 0.00085,
            beta_end: 0.012,
            beta_schedule: BetaSchedule::ScaledLinear,
            solver_order: 2,
            clip_sample: false,
            clip_sample_range: 1.0,
            timestep_spacing: TimestepSpacing::Leading,
            steps_offset: 0,
        }
    }
}

/// DPM-Solver++ multistep scheduler (second order, x0-prediction form).
///
/// The update runs in sigma space: `sigma = sqrt((1 - ac) / ac)` with
/// `alpha_t = 1 / sqrt(1 + sigma^2)`, `sigma_t = sigma * alpha_t` and
/// `lambda = -ln(sigma)`. The terminal sigma is zero, so the final step
/// returns the predicted clean sample exactly.
pub struct DpmSolverMultistepScheduler {
    config: DpmSolverConfig,
    /// sqrt((1 - ac[t]) / ac[t]) for every training timestep
    train_sigmas: Vec<f64>,
    /// Inference timesteps, descending
    timesteps: Vec<usize>,
    /// Sigmas per inference step plus the terminal zero
    sigmas: Vec<f64>,
    /// Previous predicted clean samples, newest first (multistep history)
    model_outputs: Vec<Tensor>,
    step_index: usize,
}

impl DpmSolverMultistepScheduler {
    pub fn new(config: DpmSolverConfig) -> Self {
        let betas = compute_betas(
            config.beta_schedule,
            config.beta_start,
            config.beta_end,
            config.num_train_timesteps,
        );
        let train_sigmas = alphas_cumprod(&betas)
            .iter()
            .map(|&ac| ((1.0 - ac) / ac).sqrt())
            .collect();

        Self {
            config,
            train_sigmas,
            timesteps: Vec::new(),
            sigmas: Vec::new(),
            model_outputs: Vec::new(),
            step_index: 0,
        }
    }

    pub fn config(&self) -> &DpmSolverConfig {
        &self.config
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    fn alpha_t(sigma: f64) -> f64 {
        1.0 / (1.0 + sigma * sigma).sqrt()
    }

    fn sigma_t(sigma: f64) -> f64 {
        sigma * Self::alpha_t(sigma)
    }

    fn lambda_t(sigma: f64) -> f64 {
        // -ln(sigma); +inf at the terminal sigma, which makes exp(-h) vanish
        -sigma.ln()
    }

    /// Epsilon prediction -> predicted clean sample.
    fn predict_original(&self, model_output: &Tensor, sample: &Tensor) -> Result<Tensor> {
        let sigma = self.sigmas[self.step_index];
        let alpha_t = Self::alpha_t(sigma);
        let sigma_t = Self::sigma_t(sigma);

        let x0 = ((sample - (model_output * sigma_t)?)? / alpha_t)?;
        if self.config.clip_sample {
            let r = self.config.clip_sample_range;
            x0.clamp(-r, r)
        } else {
            Ok(x0)
        }
    }

    /// First-order update from the current sample to the next sigma.
    fn first_order_update(&self, x0: &Tensor, sample: &Tensor) -> Result<Tensor> {
        let sigma_s = self.sigmas[self.step_index];
        let sigma_next = self.sigmas[self.step_index + 1];

        if sigma_next == 0.0 {
            return Ok(x0.clone());
        }

        let h = Self::lambda_t(sigma_next) - Self::lambda_t(sigma_s);
        let sample_coeff = Self::sigma_t(sigma_next) / Self::sigma_t(sigma_s);
        let x0_coeff = -Self::alpha_t(sigma_next) * ((-h).exp() - 1.0);

        ((sample * sample_coeff)? + (x0 * x0_coeff)?)?.contiguous()
    }

    /// Second-order multistep update using the previous clean-sample estimate.
    fn second_order_update(&self, sample: &Tensor) -> Result<Tensor> {
        let sigma_s1 = self.sigmas[self.step_index - 1];
        let sigma_s0 = self.sigmas[self.step_index];
        let sigma_next = self.sigmas[self.step_index + 1];

        let lambda_s1 = Self::lambda_t(sigma_s1);
        let lambda_s0 = Self::lambda_t(sigma_s0);
        let lambda_next = Self::lambda_t(sigma_next);

        let h = lambda_next - lambda_s0;
        let h_prev = lambda_s0 - lambda_s1;
        let r = h_prev / h;

        let m0 = &self.model_outputs[0];
        let m1 = &self.model_outputs[1];

        // D = (1 + 1/(2r)) * m0 - 1/(2r) * m1
        let coeff = 1.0 / (2.0 * r);
        let d = ((m0 * (1.0 + coeff))? - (m1 * coeff)?)?;

        let sample_coeff = Self::sigma_t(sigma_next) / Self::sigma_t(sigma_s0);
        let d_coeff = -Self::alpha_t(sigma_next) * ((-h).exp() - 1.0);

        ((sample * sample_coeff)? + (d * d_coeff)?)?.contiguous()
    }
}

impl NoiseScheduler for DpmSolverMultistepScheduler {
    fn set_timesteps(&mut self, num_inference_steps: usize) -> Result<()> {
        if num_inference_steps == 0 {
            candle_core::bail!("num_inference_steps must be at least 1");
        }
        self.timesteps = spread_timesteps(
            self.config.timestep_spacing,
            self.config.num_train_timesteps,
            num_inference_steps,
            self.config.steps_offset,
        );

        self.sigmas = self
            .timesteps
            .iter()
            .map(|&t| self.train_sigmas[t])
            .collect();
        self.sigmas.push(0.0);

        self.model_outputs.clear();
        self.step_index = 0;
        Ok(())
    }

    fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    fn step(
        &mut self,
        model_output: &Tensor,
        timestep: usize,
        sample: &Tensor,
        _rng: &mut SeededRng,
    ) -> Result<Tensor> {
        if self.timesteps.get(self.step_index) != Some(&timestep) {
            candle_core::bail!(
                "scheduler stepped out of order: expected t={:?}, got t={timestep}",
                self.timesteps.get(self.step_index)
            );
        }

        let dtype = sample.dtype();
        let sample_f32 = sample.to_dtype(DType::F32)?;
        let output_f32 = model_output.to_dtype(DType::F32)?;

        let x0 = self.predict_original(&output_f32, &sample_f32)?;

        self.model_outputs.insert(0, x0.clone());
        self.model_outputs.truncate(self.config.solver_order);

        let last_step = self.step_index + 1 == self.timesteps.len();
        let prev = if self.config.solver_order < 2 || self.model_outputs.len() < 2 || last_step {
            self.first_order_update(&x0, &sample_f32)?
        } else {
            self.second_order_update(&sample_f32)?
        };

        self.step_index += 1;
        prev.to_dtype(dtype)
    }
}

// =============================================================================
// Latent consistency
// =============================================================================

/// Configuration for the latent-consistency scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct LcmSchedulerConfig {
    #[serde(default = "default_num_train_timesteps")]
    pub num_train_timesteps: usize,
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,
    #[serde(default = "default_beta_end")]
    pub beta_end: f64,
    #[serde(default = "default_beta_schedule")]
    pub beta_schedule: BetaSchedule,
    /// Step count the consistency model was distilled with
    #[serde(default = "default_original_inference_steps")]
    pub original_inference_steps: usize,
    #[serde(default = "default_timestep_scaling")]
    pub timestep_scaling: f64,
}

fn default_original_inference_steps() -> usize {
    50
}
fn default_timestep_scaling() -> f64 {
    10.0
}

impl Default for LcmSchedulerConfig {
    fn default() -> Self {
        Self {
            num_train_timesteps: 1000,
            beta_start: 0.00085,
            beta_end: 0.012,
            beta_schedule: BetaSchedule::ScaledLinear,
            original_inference_steps: 50,
            timestep_scaling: 10.0,
        }
    }
}

/// Latent-consistency sampler.
///
/// Each step maps the noisy sample straight to a consistency-model estimate
/// of the clean sample, then re-noises to the next timestep. The boundary
/// condition scalings keep the map identity-preserving at t = 0.
pub struct LcmScheduler {
    config: LcmSchedulerConfig,
    alphas_cumprod: Vec<f64>,
    timesteps: Vec<usize>,
    step_index: usize,
}

const SIGMA_DATA: f64 = 0.5;

impl LcmScheduler {
    pub fn new(config: LcmSchedulerConfig) -> Self {
        let betas = compute_betas(
            config.beta_schedule,
            config.beta_start,
            config.beta_end,
            config.num_train_timesteps,
        );
        let alphas_cumprod = alphas_cumprod(&betas);
        Self {
            config,
            alphas_cumprod,
            timesteps: Vec::new(),
            step_index: 0,
        }
    }

    pub fn config(&self) -> &LcmSchedulerConfig {
        &self.config
    }

    /// Boundary-condition scalings for the consistency parameterization.
    fn boundary_scalings(&self, timestep: usize) -> (f64, f64) {
        let scaled = timestep as f64 * self.config.timestep_scaling;
        let c_skip = SIGMA_DATA * SIGMA_DATA / (scaled * scaled + SIGMA_DATA * SIGMA_DATA);
        let c_out = scaled / (scaled * scaled + SIGMA_DATA * SIGMA_DATA).sqrt();
        (c_skip, c_out)
    }
}

impl NoiseScheduler for LcmScheduler {
    fn set_timesteps(&mut self, num_inference_steps: usize) -> Result<()> {
        let k = self.config.num_train_timesteps / self.config.original_inference_steps;
        // Timesteps the consistency model was distilled on, ascending
        let origin: Vec<usize> = (0..self.config.original_inference_steps)
            .map(|i| (i + 1) * k - 1)
            .collect();

        if num_inference_steps == 0 || num_inference_steps > origin.len() {
            candle_core::bail!(
                "requested {num_inference_steps} steps; the consistency schedule supports 1..={}",
                origin.len()
            );
        }

        let skip = origin.len() / num_inference_steps;
        self.timesteps = origin
            .iter()
            .rev()
            .step_by(skip)
            .take(num_inference_steps)
            .copied()
            .collect();
        self.step_index = 0;
        Ok(())
    }

    fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    fn step(
        &mut self,
        model_output: &Tensor,
        timestep: usize,
        sample: &Tensor,
        rng: &mut SeededRng,
    ) -> Result<Tensor> {
        if self.timesteps.get(self.step_index) != Some(&timestep) {
            candle_core::bail!(
                "scheduler stepped out of order: expected t={:?}, got t={timestep}",
                self.timesteps.get(self.step_index)
            );
        }

        let dtype = sample.dtype();
        let sample_f32 = sample.to_dtype(DType::F32)?;
        let output_f32 = model_output.to_dtype(DType::F32)?;

        let alpha_prod = self.alphas_cumprod[timestep];
        let beta_prod = 1.0 - alpha_prod;

        // Epsilon prediction -> clean sample estimate
        let x0 = ((&sample_f32 - (output_f32 * beta_prod.sqrt())?)? / alpha_prod.sqrt())?;

        let (c_skip, c_out) = self.boundary_scalings(timestep);
        let denoised = ((x0 * c_out)? + (&sample_f32 * c_skip)?)?;

        let last_step = self.step_index + 1 == self.timesteps.len();
        let prev = if last_step {
            denoised
        } else {
            let prev_timestep = self.timesteps[self.step_index + 1];
            let alpha_prod_prev = self.alphas_cumprod[prev_timestep];
            let beta_prod_prev = 1.0 - alpha_prod_prev;
            let noise = rng.randn(sample_f32.shape().clone(), sample_f32.device())?;
            ((denoised * alpha_prod_prev.sqrt())? + (noise * beta_prod_prev.sqrt())?)?
        };

        self.step_index += 1;
        prev.to_dtype(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn rng() -> SeededRng {
        SeededRng::new(0)
    }

    #[test]
    fn linear_betas_hit_endpoints() {
        let betas = compute_betas(BetaSchedule::Linear, 0.0001, 0.02, 1000);
        assert!((betas[0] - 0.0001).abs() < 1e-12);
        assert!((betas[999] - 0.02).abs() < 1e-12);
        for w in betas.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn linspace_spacing_descends_from_last_timestep() {
        let ts = spread_timesteps(TimestepSpacing::Linspace, 1000, 20, 1);
        assert_eq!(ts.len(), 20);
        assert_eq!(ts[0], 999);
        for w in ts.windows(2) {
            assert!(w[1] < w[0], "not descending: {ts:?}");
        }
        // Terminal 0 is excluded; the schedule's smallest timestep stays > 0
        assert!(*ts.last().unwrap() > 0);
    }

    #[test]
    fn leading_spacing_applies_offset() {
        let ts = spread_timesteps(TimestepSpacing::Leading, 1000, 10, 1);
        assert_eq!(*ts.last().unwrap(), 1);
        let ts0 = spread_timesteps(TimestepSpacing::Leading, 1000, 10, 0);
        assert_eq!(*ts0.last().unwrap(), 0);
    }

    #[test]
    fn dpm_schedule_has_terminal_zero_sigma() {
        let config = DpmSolverConfig {
            beta_schedule: BetaSchedule::Linear,
            timestep_spacing: TimestepSpacing::Linspace,
            steps_offset: 1,
            ..Default::default()
        };
        let mut scheduler = DpmSolverMultistepScheduler::new(config);
        scheduler.set_timesteps(20).unwrap();

        assert_eq!(scheduler.timesteps().len(), 20);
        assert_eq!(scheduler.sigmas().len(), 21);
        assert_eq!(*scheduler.sigmas().last().unwrap(), 0.0);
        for w in scheduler.sigmas().windows(2) {
            assert!(w[1] < w[0], "sigmas not decreasing");
        }
    }

    #[test]
    fn dpm_single_step_returns_clean_estimate() {
        let device = Device::Cpu;
        let config = DpmSolverConfig {
            beta_schedule: BetaSchedule::Linear,
            timestep_spacing: TimestepSpacing::Linspace,
            ..Default::default()
        };
        let mut scheduler = DpmSolverMultistepScheduler::new(config);
        scheduler.set_timesteps(1).unwrap();
        let t = scheduler.timesteps()[0];

        // With zero predicted noise, x0 = sample / alpha_t and the terminal
        // step must return exactly that estimate.
        let sample = Tensor::ones((1, 4, 2, 2), DType::F32, &device).unwrap();
        let eps = Tensor::zeros((1, 4, 2, 2), DType::F32, &device).unwrap();
        let prev = scheduler.step(&eps, t, &sample, &mut rng()).unwrap();

        let sigma = scheduler.sigmas()[0];
        let expected = (1.0 + sigma * sigma).sqrt() as f32;
        let v = prev.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(v.iter().all(|&x| (x - expected).abs() < 1e-3));
    }

    #[test]
    fn dpm_steps_must_run_in_order() {
        let mut scheduler = DpmSolverMultistepScheduler::new(DpmSolverConfig::default());
        scheduler.set_timesteps(4).unwrap();
        let sample = Tensor::zeros((1, 4, 2, 2), DType::F32, &Device::Cpu).unwrap();
        let wrong_t = *scheduler.timesteps().last().unwrap();
        assert!(scheduler.step(&sample, wrong_t, &sample, &mut rng()).is_err());
    }

    #[test]
    fn dpm_run_is_deterministic() {
        let device = Device::Cpu;
        let run = || {
            let mut scheduler = DpmSolverMultistepScheduler::new(DpmSolverConfig {
                beta_schedule: BetaSchedule::Linear,
                timestep_spacing: TimestepSpacing::Linspace,
                ..Default::default()
            });
            scheduler.set_timesteps(4).unwrap();
            let mut sample = SeededRng::new(3).randn((1, 4, 2, 2), &device).unwrap();
            let mut r = rng();
            for &t in scheduler.timesteps().to_vec().iter() {
                let eps = (&sample * 0.1).unwrap();
                sample = scheduler.step(&eps, t, &sample, &mut r).unwrap();
            }
            sample.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn lcm_schedule_subsamples_origin_timesteps() {
        let mut scheduler = LcmScheduler::new(LcmSchedulerConfig {
            beta_schedule: BetaSchedule::Linear,
            ..Default::default()
        });
        scheduler.set_timesteps(4).unwrap();

        let ts = scheduler.timesteps();
        assert_eq!(ts.len(), 4);
        assert_eq!(ts[0], 999);
        for w in ts.windows(2) {
            assert!(w[1] < w[0]);
        }
        // Every timestep sits on the distilled grid (i+1)*20 - 1
        for &t in ts {
            assert_eq!((t + 1) % 20, 0, "timestep {t} off the origin grid");
        }
    }

    #[test]
    fn lcm_rejects_more_steps_than_origin_schedule() {
        let mut scheduler = LcmScheduler::new(LcmSchedulerConfig::default());
        assert!(scheduler.set_timesteps(51).is_err());
    }

    #[test]
    fn lcm_boundary_scalings_sum_behavior() {
        let scheduler = LcmScheduler::new(LcmSchedulerConfig::default());
        // At t=0 the consistency function must be the identity
        let (c_skip, c_out) = scheduler.boundary_scalings(0);
        assert!((c_skip - 1.0).abs() < 1e-9);
        assert!(c_out.abs() < 1e-9);
        // At large t nearly all weight is on the estimate
        let (c_skip, c_out) = scheduler.boundary_scalings(999);
        assert!(c_skip < 1e-5);
        assert!(c_out > 0.99);
    }

    #[test]
    fn lcm_final_step_skips_renoising() {
        let device = Device::Cpu;
        let mut scheduler = LcmScheduler::new(LcmSchedulerConfig {
            beta_schedule: BetaSchedule::Linear,
            ..Default::default()
        });
        scheduler.set_timesteps(1).unwrap();
        let t = scheduler.timesteps()[0];

        let sample = Tensor::ones((1, 4, 2, 2), DType::F32, &device).unwrap();
        let eps = Tensor::zeros((1, 4, 2, 2), DType::F32, &device).unwrap();

        // Two identical runs with different rngs agree because the last step
        // never draws noise
        let a = scheduler
            .step(&eps, t, &sample, &mut SeededRng::new(1))
            .unwrap();
        scheduler.set_timesteps(1).unwrap();
        let b = scheduler
            .step(&eps, t, &sample, &mut SeededRng::new(2))
            .unwrap();

        let av = a.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let bv = b.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(av, bv);
    }

    #[test]
    fn dpm_config_parses_diffusers_json() {
        let json = r#"{
            "num_train_timesteps": 1000,
            "beta_start": 0.00085,
            "beta_end": 0.012,
            "beta_schedule": "scaled_linear",
            "steps_offset": 1,
            "clip_sample": false
        }"#;
        let config: DpmSolverConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.beta_schedule, BetaSchedule::ScaledLinear);
        assert_eq!(config.steps_offset, 1);
        assert!(!config.clip_sample);
        assert_eq!(config.solver_order, 2);
    }
}
