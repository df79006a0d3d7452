//! Batch amplitude sweeps and the halo family table.
//!
//! A sweep unit is one `(system, Lagrange point)` pair. Inside a unit the
//! amplitudes `Az = k * step` are tried in order, because the early-stop rule
//! counts consecutive failures. Units are independent and run in parallel.

use std::io;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::corrector::{compute_halo, HaloOrbit};
use crate::error::{HaloError, Result};
use crate::system::{Cr3bpSystem, NamedSystem};
use crate::types::{LagrangePoint, State, SweepSettings};

/// One row of the family table. Field order is the column order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FamilyRow {
    pub mass_parameter: f64,
    pub lagrange_point: u8,
    pub z_amplitude: f64,
    pub jacobi_constant: f64,
    pub period: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

impl FamilyRow {
    pub fn from_orbit(orbit: &HaloOrbit) -> Self {
        let s = &orbit.initial_state;
        Self {
            mass_parameter: orbit.system.mu(),
            lagrange_point: orbit.lagrange_point.index(),
            z_amplitude: orbit.z_amplitude,
            jacobi_constant: orbit.jacobi_constant(),
            period: orbit.period,
            x: s[0],
            y: s[1],
            z: s[2],
            vx: s[3],
            vy: s[4],
            vz: s[5],
        }
    }

    pub fn state(&self) -> State {
        State::new(self.x, self.y, self.z, self.vx, self.vy, self.vz)
    }

    pub fn is_finite(&self) -> bool {
        [
            self.mass_parameter,
            self.z_amplitude,
            self.jacobi_constant,
            self.period,
        ]
        .iter()
        .chain(self.state().iter())
        .all(|v| v.is_finite())
    }
}

/// Writes a header row followed by one record per orbit.
pub fn write_family_table<W: io::Write>(writer: W, rows: &[FamilyRow]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer
            .serialize(row)
            .map_err(|e| HaloError::Table(e.to_string()))?;
    }
    csv_writer
        .flush()
        .map_err(|e| HaloError::Table(e.to_string()))
}

pub fn read_family_table<R: io::Read>(reader: R) -> Result<Vec<FamilyRow>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    csv_reader
        .deserialize()
        .map(|record| record.map_err(|e| HaloError::Table(e.to_string())))
        .collect()
}

/// One independent sweep: a system and a collinear point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepUnit {
    pub system: Cr3bpSystem,
    pub lagrange_point: LagrangePoint,
}

impl SweepUnit {
    pub fn new(system: Cr3bpSystem, lagrange_point: LagrangePoint) -> Self {
        Self {
            system,
            lagrange_point,
        }
    }

    /// Every named system at L1 and L2, in catalogue order.
    pub fn catalogue() -> Vec<SweepUnit> {
        NamedSystem::ALL
            .iter()
            .flat_map(|named| {
                [LagrangePoint::L1, LagrangePoint::L2]
                    .into_iter()
                    .map(move |point| SweepUnit::new(named.system(), point))
            })
            .collect()
    }
}

/// Progress snapshot of a stepped sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepProgress {
    pub done: bool,
    pub amplitudes_tried: u64,
    pub total_amplitudes: u64,
    pub accepted: usize,
    pub failures: usize,
    pub stopped_early: bool,
    pub current_amplitude: f64,
}

/// Amplitude sweep for one unit, advanced one amplitude at a time.
pub struct FamilySweep {
    unit: SweepUnit,
    settings: SweepSettings,
    next_index: u64,
    total: u64,
    consecutive_failures: usize,
    failures: usize,
    stopped_early: bool,
    rows: Vec<FamilyRow>,
}

impl FamilySweep {
    pub fn new(unit: SweepUnit, settings: SweepSettings) -> Result<Self> {
        if !settings.amplitude_step.is_finite() || settings.amplitude_step <= 0.0 {
            return Err(HaloError::InvalidInput(format!(
                "amplitude_step must be positive, got {}",
                settings.amplitude_step
            )));
        }
        if !settings.max_amplitude.is_finite() || settings.max_amplitude < 0.0 {
            return Err(HaloError::InvalidInput(format!(
                "max_amplitude must be non-negative, got {}",
                settings.max_amplitude
            )));
        }
        if settings.max_consecutive_failures == 0 {
            return Err(HaloError::InvalidInput(
                "max_consecutive_failures must be greater than zero".to_string(),
            ));
        }
        // Slack so that e.g. 0.01 / 1e-6 still includes the endpoint.
        let total = (settings.max_amplitude / settings.amplitude_step + 1e-9).floor() as u64 + 1;
        Ok(Self {
            unit,
            settings,
            next_index: 0,
            total,
            consecutive_failures: 0,
            failures: 0,
            stopped_early: false,
            rows: Vec::new(),
        })
    }

    pub fn unit(&self) -> SweepUnit {
        self.unit
    }

    pub fn is_done(&self) -> bool {
        self.stopped_early || self.next_index >= self.total
    }

    fn amplitude(&self, index: u64) -> f64 {
        index as f64 * self.settings.amplitude_step
    }

    /// Corrects and screens one amplitude.
    fn evaluate(&self, z_amplitude: f64) -> Result<FamilyRow> {
        let halo = &self.settings.halo;
        let orbit = compute_halo(
            &self.unit.system,
            self.unit.lagrange_point,
            z_amplitude,
            self.settings.hemisphere,
            halo,
        )?
        .into_orbit()?;

        let row = FamilyRow::from_orbit(&orbit);
        if !row.is_finite() {
            return Err(HaloError::InvalidInput("non-finite orbit state".to_string()));
        }
        if orbit.period < self.settings.min_period {
            return Err(HaloError::InvalidInput(format!(
                "period {} below minimum {}",
                orbit.period, self.settings.min_period
            )));
        }
        let error = orbit.periodicity_error(&halo.integrator)?;
        if !(error <= halo.periodicity_tolerance) {
            return Err(HaloError::NotPeriodic { error });
        }
        Ok(row)
    }

    /// Tries the next amplitude. Returns the accepted row, if any.
    pub fn step(&mut self) -> Option<FamilyRow> {
        if self.is_done() {
            return None;
        }
        let z_amplitude = self.amplitude(self.next_index);
        self.next_index += 1;

        match self.evaluate(z_amplitude) {
            Ok(row) => {
                self.consecutive_failures = 0;
                self.rows.push(row);
                Some(row)
            }
            Err(err) => {
                self.failures += 1;
                self.consecutive_failures += 1;
                if err.is_formula_fault() {
                    warn!(
                        "mu = {}, {}: singular correction at Az = {:e}: {}",
                        self.unit.system.mu(),
                        self.unit.lagrange_point,
                        z_amplitude,
                        err
                    );
                } else {
                    debug!(
                        "mu = {}, {}: skipped Az = {:e}: {}",
                        self.unit.system.mu(),
                        self.unit.lagrange_point,
                        z_amplitude,
                        err
                    );
                }
                if self.consecutive_failures >= self.settings.max_consecutive_failures {
                    self.stopped_early = true;
                    warn!(
                        "mu = {}, {}: stopping sweep at Az = {:e} after {} consecutive failures",
                        self.unit.system.mu(),
                        self.unit.lagrange_point,
                        z_amplitude,
                        self.consecutive_failures
                    );
                }
                None
            }
        }
    }

    pub fn run_steps(&mut self, batch_size: usize) -> SweepProgress {
        for _ in 0..batch_size {
            if self.is_done() {
                break;
            }
            self.step();
        }
        self.progress()
    }

    pub fn progress(&self) -> SweepProgress {
        SweepProgress {
            done: self.is_done(),
            amplitudes_tried: self.next_index,
            total_amplitudes: self.total,
            accepted: self.rows.len(),
            failures: self.failures,
            stopped_early: self.stopped_early,
            current_amplitude: self.amplitude(self.next_index.saturating_sub(1)),
        }
    }

    pub fn rows(&self) -> &[FamilyRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<FamilyRow> {
        self.rows
    }
}

/// Runs one unit to completion.
pub fn sweep_family(unit: SweepUnit, settings: &SweepSettings) -> Result<Vec<FamilyRow>> {
    let mut sweep = FamilySweep::new(unit, *settings)?;
    while !sweep.is_done() {
        sweep.step();
    }
    let progress = sweep.progress();
    info!(
        "mu = {}, {}: {} of {} amplitudes accepted",
        unit.system.mu(),
        unit.lagrange_point,
        progress.accepted,
        progress.amplitudes_tried
    );
    Ok(sweep.into_rows())
}

/// Runs every unit (in parallel when enabled) and concatenates rows in unit order.
pub fn sweep_families(units: &[SweepUnit], settings: &SweepSettings) -> Result<Vec<FamilyRow>> {
    #[cfg(feature = "parallel")]
    let iter = units.par_iter();
    #[cfg(not(feature = "parallel"))]
    let iter = units.iter();

    let tables: Vec<Vec<FamilyRow>> = iter
        .map(|unit| sweep_family(*unit, settings))
        .collect::<Result<_>>()?;
    Ok(tables.into_iter().flatten().collect())
}
