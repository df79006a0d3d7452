//! Stepped family-sweep runner.

use crate::system::{js_error, parse_lagrange_point, serialize, settings_or_default};
use anyhow::Context;
use halo_core::family::{FamilySweep, SweepUnit};
use halo_core::system::Cr3bpSystem;
use halo_core::types::SweepSettings;
use wasm_bindgen::prelude::*;

/// WASM-exported runner for an amplitude sweep of one `(system, L)` unit.
/// Runs a batch of amplitudes per call so the host can report progress.
#[wasm_bindgen]
pub struct WasmFamilySweepRunner {
    sweep: Option<FamilySweep>,
}

#[wasm_bindgen]
impl WasmFamilySweepRunner {
    #[wasm_bindgen(constructor)]
    pub fn new(mu: f64, point: u8, settings_val: JsValue) -> Result<WasmFamilySweepRunner, JsValue> {
        console_error_panic_hook::set_once();

        let system = Cr3bpSystem::new(mu)
            .context("Invalid CR3BP system")
            .map_err(js_error)?;
        let point = parse_lagrange_point(point).map_err(js_error)?;
        let settings: SweepSettings = settings_or_default(settings_val, "sweep")?;

        let sweep = FamilySweep::new(SweepUnit::new(system, point), settings)
            .context("Sweep init failed")
            .map_err(js_error)?;
        Ok(WasmFamilySweepRunner { sweep: Some(sweep) })
    }

    pub fn is_done(&self) -> bool {
        self.sweep.as_ref().map_or(true, |sweep| sweep.is_done())
    }

    /// Tries up to `batch_size` amplitudes and returns progress.
    pub fn run_steps(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let sweep = self
            .sweep
            .as_mut()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;
        let progress = sweep.run_steps(batch_size as usize);
        serialize(&progress)
    }

    pub fn get_progress(&self) -> Result<JsValue, JsValue> {
        let sweep = self
            .sweep
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;
        serialize(&sweep.progress())
    }

    /// Accepted family rows; consumes the runner.
    pub fn get_result(&mut self) -> Result<JsValue, JsValue> {
        let sweep = self
            .sweep
            .take()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;
        serialize(&sweep.into_rows())
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use halo_core::system::NamedSystem;
    use serde_wasm_bindgen::to_value;
    use wasm_bindgen_test::wasm_bindgen_test;

    fn coarse_settings() -> JsValue {
        let settings = SweepSettings {
            amplitude_step: 1e-3,
            max_amplitude: 1e-3,
            ..SweepSettings::default()
        };
        to_value(&settings).expect("settings")
    }

    fn build_runner() -> WasmFamilySweepRunner {
        WasmFamilySweepRunner::new(
            NamedSystem::EarthMoon.mass_parameter(),
            1,
            coarse_settings(),
        )
        .expect("runner")
    }

    #[wasm_bindgen_test]
    fn sweep_runner_finishes_and_returns_rows() {
        let mut runner = build_runner();
        assert!(!runner.is_done());
        runner.run_steps(10).expect("run steps");
        assert!(runner.is_done());
        assert!(runner.get_result().is_ok());
    }

    #[wasm_bindgen_test]
    fn sweep_runner_rejects_unknown_lagrange_point() {
        let result = WasmFamilySweepRunner::new(0.01, 3, JsValue::UNDEFINED);
        let message = result.err().and_then(|err| err.as_string()).unwrap_or_default();
        assert!(message.contains("Unknown Lagrange point"));
    }

    #[wasm_bindgen_test]
    fn sweep_runner_rejects_invalid_settings() {
        let result = WasmFamilySweepRunner::new(0.01, 1, JsValue::from_str("nope"));
        let message = result.err().and_then(|err| err.as_string()).unwrap_or_default();
        assert!(message.contains("Invalid sweep settings"));
    }

    #[wasm_bindgen_test]
    fn sweep_runner_errors_after_result_taken() {
        let mut runner = build_runner();
        runner.run_steps(10).expect("run steps");
        runner.get_result().expect("result");

        let err = runner.run_steps(1).expect_err("runner should be consumed");
        let message = err.as_string().unwrap_or_default();
        assert!(message.contains("Runner not initialized"));
    }
}
