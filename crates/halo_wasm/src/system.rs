//! CR3BP system handle and one-shot pipeline calls.

use anyhow::{anyhow, bail, Context};
use halo_core::analytical::richardson_halo;
use halo_core::corrector::{compute_halo, HaloOrbit};
use halo_core::manifold::generate_manifold;
use halo_core::monodromy::analyze_monodromy;
use halo_core::propagation::{sample_trajectory, Trajectory};
use halo_core::system::{Cr3bpSystem, NamedSystem};
use halo_core::types::{
    HaloSettings, Hemisphere, IntegratorSettings, LagrangePoint, ManifoldSettings, State,
};
use js_sys::Float64Array;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmHaloSystem {
    pub(crate) system: Cr3bpSystem,
}

pub(crate) fn js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{:#}", err))
}

pub(crate) fn parse_lagrange_point(index: u8) -> anyhow::Result<LagrangePoint> {
    LagrangePoint::from_index(index)
        .ok_or_else(|| anyhow!("Unknown Lagrange point L{}; expected 1 or 2.", index))
}

pub(crate) fn hemisphere_from_flag(northern: bool) -> Hemisphere {
    if northern {
        Hemisphere::Northern
    } else {
        Hemisphere::Southern
    }
}

pub(crate) fn state_from_slice(values: &[f64]) -> anyhow::Result<State> {
    if values.len() != 6 {
        bail!("State must have 6 components, got {}.", values.len());
    }
    Ok(State::from_column_slice(values))
}

/// Positions then velocities of each sample, row by row.
pub(crate) fn flatten_trajectory(trajectory: &Trajectory) -> Vec<f64> {
    trajectory
        .states
        .iter()
        .flat_map(|state| state.iter().copied())
        .collect()
}

/// Missing (`undefined`/`null`) settings fall back to the defaults.
pub(crate) fn settings_or_default<T>(value: JsValue, label: &str) -> Result<T, JsValue>
where
    T: DeserializeOwned + Default,
{
    if value.is_undefined() || value.is_null() {
        return Ok(T::default());
    }
    from_value(value).map_err(|e| JsValue::from_str(&format!("Invalid {} settings: {}", label, e)))
}

pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

fn parse_orbit(value: JsValue) -> Result<HaloOrbit, JsValue> {
    let orbit: HaloOrbit = from_value(value)
        .map_err(|e| JsValue::from_str(&format!("Invalid halo orbit: {}", e)))?;
    Cr3bpSystem::new(orbit.system.mu())
        .context("Halo orbit carries an invalid system")
        .map_err(js_error)?;
    Ok(orbit)
}

#[wasm_bindgen]
impl WasmHaloSystem {
    #[wasm_bindgen(constructor)]
    pub fn new(mu: f64) -> Result<WasmHaloSystem, JsValue> {
        console_error_panic_hook::set_once();
        let system = Cr3bpSystem::new(mu)
            .context("Invalid CR3BP system")
            .map_err(js_error)?;
        Ok(WasmHaloSystem { system })
    }

    /// Builds a catalogue system such as `"earth-moon"`.
    pub fn from_name(name: &str) -> Result<WasmHaloSystem, JsValue> {
        console_error_panic_hook::set_once();
        let named = NamedSystem::from_name(name)
            .ok_or_else(|| JsValue::from_str(&format!("Unknown system: {}", name)))?;
        Ok(WasmHaloSystem {
            system: named.system(),
        })
    }

    pub fn system_names() -> Vec<String> {
        NamedSystem::ALL
            .iter()
            .map(|named| named.name().to_string())
            .collect()
    }

    pub fn mass_parameter(&self) -> f64 {
        self.system.mu()
    }

    pub fn lagrange_point_x(&self, point: u8) -> Result<f64, JsValue> {
        let point = parse_lagrange_point(point).map_err(js_error)?;
        Ok(self.system.lagrange_point_x(point))
    }

    pub fn jacobi_constant(&self, state: Vec<f64>) -> Result<f64, JsValue> {
        let state = state_from_slice(&state).map_err(js_error)?;
        Ok(self.system.jacobi_constant(&state))
    }

    /// Samples a state over `duration`; returns `samples * 6` values.
    pub fn propagate(
        &self,
        state: Vec<f64>,
        duration: f64,
        samples: u32,
        settings_val: JsValue,
    ) -> Result<Float64Array, JsValue> {
        let state = state_from_slice(&state).map_err(js_error)?;
        let settings: IntegratorSettings = settings_or_default(settings_val, "integrator")?;
        let trajectory = sample_trajectory(&self.system, &state, duration, samples as usize, &settings)
            .context("Propagation failed")
            .map_err(js_error)?;
        Ok(Float64Array::from(flatten_trajectory(&trajectory).as_slice()))
    }

    pub fn analytical_halo(
        &self,
        point: u8,
        z_amplitude: f64,
        northern: bool,
        samples: u32,
    ) -> Result<JsValue, JsValue> {
        let point = parse_lagrange_point(point).map_err(js_error)?;
        let halo = richardson_halo(
            &self.system,
            point,
            z_amplitude,
            hemisphere_from_flag(northern),
            samples as usize,
        )
        .context("Analytical approximation failed")
        .map_err(js_error)?;
        serialize(&halo)
    }

    /// Returns the tagged correction outcome (`Converged` or `Failed`).
    pub fn compute_halo(
        &self,
        point: u8,
        z_amplitude: f64,
        northern: bool,
        settings_val: JsValue,
    ) -> Result<JsValue, JsValue> {
        let point = parse_lagrange_point(point).map_err(js_error)?;
        let settings: HaloSettings = settings_or_default(settings_val, "halo")?;
        let outcome = compute_halo(
            &self.system,
            point,
            z_amplitude,
            hemisphere_from_flag(northern),
            &settings,
        )
        .context("Halo correction failed")
        .map_err(js_error)?;
        serialize(&outcome)
    }

    pub fn monodromy(&self, orbit_val: JsValue, settings_val: JsValue) -> Result<JsValue, JsValue> {
        let orbit = parse_orbit(orbit_val)?;
        let settings: HaloSettings = settings_or_default(settings_val, "halo")?;
        let analysis = analyze_monodromy(&orbit, &settings)
            .context("Monodromy analysis failed")
            .map_err(js_error)?;
        serialize(&analysis)
    }

    pub fn manifold(
        &self,
        orbit_val: JsValue,
        manifold_settings_val: JsValue,
        halo_settings_val: JsValue,
    ) -> Result<JsValue, JsValue> {
        let orbit = parse_orbit(orbit_val)?;
        let settings: ManifoldSettings = settings_or_default(manifold_settings_val, "manifold")?;
        let halo: HaloSettings = settings_or_default(halo_settings_val, "halo")?;
        let manifold = generate_manifold(&orbit, None, &settings, &halo)
            .context("Manifold generation failed")
            .map_err(js_error)?;
        serialize(&manifold)
    }
}
