use std::io;
use std::path::Path;

use log::{info, warn};

use crate::audio_ring::{SampleConsumer, sample_ring};
use crate::bus::Bus;
use crate::cartridge::{Cartridge, LoadError};
use crate::cpu::Cpu;
use crate::joypad::Button;
use crate::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::serial::LinkPort;

/// T-cycles per video frame: 154 lines of 456 dots.
pub const CYCLES_PER_FRAME: u32 = 70224;

/// Callback fired when a conformance ROM reports its result: `true` for
/// the pass pattern, `false` for the fail pattern.
pub type TestCallback = Box<dyn FnMut(bool) + Send>;

/// The assembled console: CPU plus bus, with every peripheral inside.
///
/// The CPU is the clock master; `step` runs one instruction and drags DMA,
/// PPU, timer, APU and serial along with T-cycle granularity.
pub struct Machine {
    pub cpu: Cpu,
    pub bus: Bus,
    test_callback: Option<TestCallback>,
}

impl Machine {
    /// Machine in the documented post-boot state, ready to run from 0x0100
    /// without a boot ROM.
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            bus: Bus::new(),
            test_callback: None,
        }
    }

    /// Machine at raw power-on, for running a boot ROM from address 0.
    pub fn new_power_on() -> Self {
        Self {
            cpu: Cpu::new_power_on(),
            bus: Bus::new_power_on(),
            test_callback: None,
        }
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.bus.load_cart(cart);
    }

    /// Load a ROM image from memory.
    pub fn load_rom_bytes(&mut self, data: Vec<u8>) -> Result<(), LoadError> {
        let cart = Cartridge::from_bytes(data)?;
        self.bus.load_cart(cart);
        Ok(())
    }

    /// Load a ROM file, picking up a battery save next to it if present.
    pub fn load_rom_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), LoadError> {
        let cart = Cartridge::from_file(path)?;
        self.bus.load_cart(cart);
        Ok(())
    }

    /// Map a boot ROM; must be exactly 256 bytes.
    pub fn load_boot_rom(&mut self, data: Vec<u8>) -> Result<(), LoadError> {
        if data.len() != 0x100 {
            return Err(LoadError::BadBootRomSize(data.len()));
        }
        self.bus.load_boot_rom(data);
        Ok(())
    }

    pub fn load_boot_rom_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), LoadError> {
        let data = std::fs::read(path)?;
        self.load_boot_rom(data)
    }

    /// Reset to the initial state while keeping the loaded cartridge and
    /// boot ROM in place.
    pub fn reset(&mut self) {
        let cart = self.bus.cart.take();
        let boot = self.bus.boot_rom.take();
        if boot.is_some() {
            self.cpu = Cpu::new_power_on();
            self.bus = Bus::new_power_on();
            if let Some(b) = boot {
                self.bus.load_boot_rom(b);
            }
        } else {
            self.cpu = Cpu::new();
            self.bus = Bus::new();
        }
        if let Some(c) = cart {
            self.bus.load_cart(c);
        }
        info!("machine reset");
    }

    /// Execute one instruction; returns the T-cycles consumed.
    pub fn step(&mut self) -> u32 {
        let cycles = self.cpu.step(&mut self.bus);
        if let Some(pass) = self.cpu.take_harness_event() {
            if let Some(cb) = self.test_callback.as_mut() {
                cb(pass);
            }
        }
        cycles
    }

    /// Run for at least `cycles` T-cycles.
    pub fn step_cycles(&mut self, cycles: u64) {
        let mut executed = 0u64;
        while executed < cycles {
            executed += self.step() as u64;
        }
    }

    /// Run until the PPU signals a completed frame, bounded by one frame's
    /// worth of cycles for when the LCD is off.
    pub fn run_frame(&mut self) {
        self.bus.ppu.clear_frame_complete();
        let mut executed = 0u32;
        while !self.bus.ppu.frame_complete() && executed < CYCLES_PER_FRAME {
            executed += self.step();
        }
    }

    /// 160x144 buffer of 2-bit shades, 0 lightest, 3 darkest. Stable while
    /// the frame-complete flag is up.
    pub fn framebuffer(&self) -> &[u8] {
        self.bus.ppu.framebuffer()
    }

    pub fn framebuffer_dimensions(&self) -> (usize, usize) {
        (SCREEN_WIDTH, SCREEN_HEIGHT)
    }

    pub fn frame_complete(&self) -> bool {
        self.bus.ppu.frame_complete()
    }

    pub fn clear_frame_complete(&mut self) {
        self.bus.ppu.clear_frame_complete();
    }

    /// Update one button from the host.
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.bus
            .joypad
            .set_button(button, pressed, &mut self.bus.if_reg);
    }

    /// Create and attach the audio ring; the returned consumer feeds the
    /// host audio callback.
    pub fn attach_audio(&mut self, capacity_frames: usize) -> SampleConsumer {
        let (producer, consumer) = sample_ring(capacity_frames);
        self.bus.apu.set_output(producer);
        consumer
    }

    /// Plug in a link-cable partner.
    pub fn connect_link(&mut self, port: Box<dyn LinkPort + Send>) {
        self.bus.serial.connect(port);
    }

    /// Drain bytes the serial port has sent so far.
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.bus.serial.take_output()
    }

    /// Register the conformance-result callback (LD B,B with the magic
    /// register patterns).
    pub fn on_test_complete(&mut self, cb: TestCallback) {
        self.test_callback = Some(cb);
    }

    /// Write battery-backed cartridge RAM out, if the cartridge has a
    /// battery. In-memory state is unaffected by failures.
    pub fn save_cart_ram(&mut self) -> io::Result<()> {
        if let Some(cart) = self.bus.cart.as_mut() {
            if let Err(e) = cart.save_ram() {
                warn!("battery save failed: {e}");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}
