//! WASM bindings for `halo_core`.
//!
//! `WasmHaloSystem` exposes one-shot pipeline calls (analytical seed,
//! correction, monodromy, manifolds); `WasmFamilySweepRunner` runs amplitude
//! sweeps in batches so the host can report progress.

mod runner;
mod system;

pub use runner::WasmFamilySweepRunner;
pub use system::WasmHaloSystem;
