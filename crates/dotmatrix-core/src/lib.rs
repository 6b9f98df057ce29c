//! Cycle-accurate emulation core for the original monochrome Game Boy.
//!
//! This crate contains the platform-agnostic hardware model (CPU, bus, PPU,
//! APU, timer, DMA, cartridge mappers). Frontends supply a window, an audio
//! device and input mapping, and drive the core through the [`machine`]
//! facade.
//!
//! Every subsystem advances with T-cycle (4.194304 MHz) granularity: the CPU
//! broadcasts each completed M-cycle to the bus, which steps DMA, PPU, timer,
//! APU and serial in lockstep before the next memory access. That ordering is
//! what makes mid-instruction timing (timer edges, OAM DMA conflicts, STAT
//! transitions) observable exactly as on hardware.

/// Audio Processing Unit: four channels, frame sequencer, mixer.
pub mod apu;

/// Lock-free single-producer/single-consumer stereo sample ring.
pub mod audio_ring;

/// Memory bus: address decoding, OAM DMA arbitration, peripheral clocking.
pub mod bus;

/// Cartridge loading, header parsing and MBC1/2/3/5 bank switching.
pub mod cartridge;

/// Sharp LR35902 CPU core.
pub mod cpu;

/// OAM DMA engine.
pub mod dma;

/// Joypad matrix and its interrupt edge logic.
pub mod joypad;

/// The assembled machine: CPU + bus, stepping and host-facing signals.
pub mod machine;

/// Pixel Processing Unit: scanline state machine and pixel FIFOs.
pub mod ppu;

/// Serial port with a pluggable link partner.
pub mod serial;

/// DIV/TIMA timer unit.
pub mod timer;

pub use cartridge::{Cartridge, LoadError};
pub use joypad::Button;
pub use machine::Machine;
