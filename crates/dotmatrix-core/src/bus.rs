use log::trace;

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::dma::OamDma;
use crate::joypad::Joypad;
use crate::ppu::Ppu;
use crate::serial::Serial;
use crate::timer::Timer;

/// Physical bus a given address lives on, for OAM DMA conflict checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusClass {
    /// Cartridge ROM/RAM, WRAM and its echo.
    External,
    /// Video RAM.
    Video,
    /// OAM, I/O, HRAM, IE.
    Internal,
}

fn bus_class(addr: u16) -> BusClass {
    match addr {
        0x0000..=0x7FFF => BusClass::External,
        0x8000..=0x9FFF => BusClass::Video,
        0xA000..=0xFDFF => BusClass::External,
        _ => BusClass::Internal,
    }
}

/// The memory bus and everything hanging off it.
///
/// Owns every peripheral by value; `read_byte`/`write_byte` dispatch on
/// address, and `tick` advances DMA, PPU, timer, APU and serial by one
/// T-cycle each, in that order. The CPU calls `tick` once per completed
/// M-cycle, so peripheral state is always consistent with the memory access
/// stream.
pub struct Bus {
    pub wram: [u8; 0x2000],
    pub hram: [u8; 0x7F],
    /// Pending interrupt lines, 5 meaningful bits.
    pub if_reg: u8,
    /// Interrupt enable; all 8 bits are readable and writable.
    pub ie_reg: u8,
    pub boot_rom: Option<Vec<u8>>,
    pub boot_mapped: bool,
    pub cart: Option<Cartridge>,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub serial: Serial,
    pub joypad: Joypad,
    pub dma: OamDma,
}

impl Bus {
    /// Post-boot state, used when no boot ROM is supplied.
    pub fn new() -> Self {
        Self {
            wram: [0; 0x2000],
            hram: [0; 0x7F],
            if_reg: 0x01,
            ie_reg: 0,
            boot_rom: None,
            boot_mapped: false,
            cart: None,
            ppu: Ppu::new_post_boot(),
            apu: Apu::new_post_boot(),
            timer: Timer::new(),
            serial: Serial::new(),
            joypad: Joypad::new(),
            dma: OamDma::new(),
        }
    }

    /// Power-on state for running a boot ROM: everything zeroed, LCD off.
    pub fn new_power_on() -> Self {
        Self {
            wram: [0; 0x2000],
            hram: [0; 0x7F],
            if_reg: 0,
            ie_reg: 0,
            boot_rom: None,
            boot_mapped: false,
            cart: None,
            ppu: Ppu::new(),
            apu: Apu::new(),
            timer: Timer::new(),
            serial: Serial::new(),
            joypad: Joypad::new(),
            dma: OamDma::new(),
        }
    }

    pub fn load_cart(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    /// Map a 256-byte boot ROM over 0x0000-0x00FF.
    pub fn load_boot_rom(&mut self, data: Vec<u8>) {
        self.boot_rom = Some(data);
        self.boot_mapped = true;
    }

    pub fn read_byte(&mut self, addr: u16) -> u8 {
        // While a DMA transfer runs, the source bus is taken; CPU reads on
        // the same bus float to 0xFF. High RAM and I/O stay reachable.
        if self.dma.transferring()
            && addr < 0xFE00
            && bus_class(addr) == bus_class(self.dma.source())
        {
            trace!("DMA bus conflict read at {addr:04X}");
            return 0xFF;
        }

        match addr {
            0x0000..=0x00FF if self.boot_mapped => self
                .boot_rom
                .as_ref()
                .and_then(|rom| rom.get(addr as usize).copied())
                .unwrap_or(0xFF),
            0x0000..=0x7FFF => self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF),
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[(addr - 0x8000) as usize]
                } else {
                    0xFF
                }
            }
            0xA000..=0xBFFF => self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF),
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize],
            // Echo RAM mirrors WRAM.
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize],
            0xFE00..=0xFE9F => {
                if self.dma.blocks_oam() || !self.ppu.oam_accessible() {
                    0xFF
                } else {
                    self.ppu.oam[(addr - 0xFE00) as usize]
                }
            }
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.joypad.read(&mut self.if_reg),
            0xFF01 | 0xFF02 => self.serial.read(addr),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.if_reg | 0xE0,
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            0xFF46 => self.dma.page(),
            0xFF40..=0xFF4B => self.ppu.read_reg(addr),
            0xFF50 => {
                if self.boot_mapped {
                    0x00
                } else {
                    0xFF
                }
            }
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ie_reg,
            _ => 0xFF,
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[(addr - 0x8000) as usize] = val;
                }
            }
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize] = val,
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize] = val,
            0xFE00..=0xFE9F => {
                if !self.dma.blocks_oam() && self.ppu.oam_accessible() {
                    self.ppu.oam[(addr - 0xFE00) as usize] = val;
                }
            }
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.joypad.write(val, &mut self.if_reg),
            0xFF01 | 0xFF02 => self.serial.write(addr, val),
            0xFF04 => self.reset_div(),
            0xFF05..=0xFF07 => self.timer.write(addr, val, &mut self.if_reg),
            0xFF0F => self.if_reg = val & 0x1F,
            0xFF10..=0xFF3F => {
                let bit12 = self.timer.counter & 0x1000 != 0;
                self.apu.write_reg(addr, val, bit12);
            }
            0xFF46 => self.dma.start(val),
            0xFF40..=0xFF4B => self.ppu.write_reg(addr, val, &mut self.if_reg),
            0xFF50 => {
                // Write-once: any nonzero value unmaps the boot ROM for good.
                if val != 0 {
                    self.boot_mapped = false;
                }
            }
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ie_reg = val,
            _ => {}
        }
    }

    /// DIV write. Zeroing the counter can produce falling edges on every
    /// tap at once, so the timer glitch, the APU sequencer and the serial
    /// clock all get their edge here.
    pub fn reset_div(&mut self) {
        let bit12 = self.timer.counter & 0x1000 != 0;
        let bit8 = self.timer.counter & 0x0100 != 0;
        self.timer.reset_div(&mut self.if_reg);
        if bit12 {
            self.apu.clock_sequencer();
        }
        if bit8 {
            self.serial.clock_edge(&mut self.if_reg);
        }
    }

    /// The DMA engine's own view of memory: no conflict rules, and sources
    /// in 0xE000-0xFFFF alias WRAM.
    fn dma_read(&mut self, addr: u16) -> u8 {
        let addr = if addr >= 0xE000 { addr & !0x2000 } else { addr };
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF)
            }
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[(addr - 0x8000) as usize]
                } else {
                    0xFF
                }
            }
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize],
            _ => 0xFF,
        }
    }

    /// Advance every peripheral by `dots` T-cycles: DMA, then PPU, timer,
    /// APU, serial.
    pub fn tick(&mut self, dots: u32) {
        if let Some(cart) = self.cart.as_mut() {
            cart.step_rtc(dots);
        }
        for _ in 0..dots {
            if let Some(index) = self.dma.tick() {
                let byte = self.dma_read(self.dma.source());
                self.ppu.dma_write_oam(index, byte);
            }
            self.ppu.step(1, &mut self.if_reg);
            let taps = self.timer.tick(&mut self.if_reg);
            if taps.bit12_fell {
                self.apu.clock_sequencer();
            }
            self.apu.step(1);
            if taps.bit8_fell {
                self.serial.clock_edge(&mut self.if_reg);
            }
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
