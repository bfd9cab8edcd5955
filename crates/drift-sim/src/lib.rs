//! Drift Sim - Backend-independent particle flow
//!
//! Everything that decides what the particle field does, independent of
//! where the passes execute:
//! - Particle grids and the tagged double buffer
//! - Quality ladder, spawn tables and de-duplication offsets
//! - Curl-noise advection with respawn
//! - Bootstrap and resample kernels for live quality changes
//! - The incremental sort network and its per-frame schedule
//! - View flip tracking, light projection and opacity accumulation
//! - `FlowPipeline`, which sequences one tick over a `FlowBackend`
//!
//! `CpuBackend` executes every pass on the host. It is slow but exact and is
//! what the tests and the `simulate` command run against.

pub mod backend;
mod clock;
pub mod curl;
pub mod floor;
pub mod grid;
pub mod opacity;
pub mod pipeline;
pub mod quality;
pub mod resample;
pub mod sort;
pub mod stepper;
pub mod tables;
pub mod view;

pub use backend::{CpuBackend, FlowBackend, ParticleDraw, PassLog, ResamplePass};
pub use clock::FrameClock;
pub use curl::CurlNoise;
pub use floor::{BackgroundGradient, FloorShadow};
pub use grid::{DoubleBuffer, ParticleGrid, ParticleRecord, Resolution};
pub use opacity::{LightProjection, OpacityField};
pub use pipeline::{FlowPhase, FlowPipeline, FrameReport, PipelineState, Transition};
pub use quality::{QualityLadder, QualityLevel};
pub use sort::{SortState, SortStep};
pub use stepper::{SimulationStepper, StepParams};
pub use tables::{FlowTables, OffsetTable, SpawnTable};
pub use view::{BlendOrder, ViewSource, ViewState, ViewUpdate};
