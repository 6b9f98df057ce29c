use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{info, warn};
use thiserror::Error;

pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;

const HEADER_END: usize = 0x150;
const MAX_ROM_SIZE: usize = 8 * 1024 * 1024;

/// Logo bitmap from the cartridge header, used by the multicart probe.
const HEADER_LOGO: [u8; 48] = [
    0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0C, 0x00,
    0x0D, 0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, 0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD,
    0xD9, 0x99, 0xBB, 0xBB, 0x67, 0x63, 0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB,
    0xB9, 0x33, 0x3E,
];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("ROM image too small ({0} bytes, need at least 0x150)")]
    TooSmall(usize),
    #[error("ROM image too large ({0} bytes, limit is 8 MiB)")]
    TooLarge(usize),
    #[error("boot ROM must be exactly 256 bytes, got {0}")]
    BadBootRomSize(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

#[derive(Debug)]
enum MbcState {
    None,
    Mbc1 {
        /// 5-bit low bank register (BANK1).
        bank1: u8,
        /// 2-bit high bank / RAM bank register (BANK2).
        bank2: u8,
        /// Banking mode select: false = simple, true = advanced.
        mode: bool,
        ram_enable: bool,
        /// Multicart wiring: BANK2 feeds bank bits 4-5 instead of 5-6.
        multicart: bool,
    },
    Mbc2 {
        rom_bank: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        /// RAM bank 0-3, or RTC register select 0x08-0x0C.
        ram_bank: u8,
        ram_enable: bool,
        rtc: Option<Rtc>,
        latch_armed: bool,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enable: bool,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct RtcRegs {
    seconds: u8,
    minutes: u8,
    hours: u8,
    days: u16,
    halt: bool,
    carry: bool,
}

impl RtcRegs {
    fn day_high(&self) -> u8 {
        let mut out = ((self.days >> 8) as u8) & 0x01;
        if self.halt {
            out |= 0x40;
        }
        if self.carry {
            out |= 0x80;
        }
        out
    }
}

/// MBC3 real-time clock, clocked from the emulated T-cycle stream.
///
/// Two register sets: the live one ticks; the latched one is what reads
/// see, refreshed by a 0x00 -> 0x01 write sequence to 6000-7FFF.
#[derive(Debug, Clone)]
struct Rtc {
    live: RtcRegs,
    latched: RtcRegs,
    subsecond_cycles: u32,
}

const RTC_CYCLES_PER_SECOND: u32 = 4_194_304;

impl Rtc {
    fn new() -> Self {
        Self {
            live: RtcRegs::default(),
            latched: RtcRegs::default(),
            subsecond_cycles: 0,
        }
    }

    fn latch(&mut self) {
        self.latched = self.live;
    }

    fn read(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.latched.seconds & 0x3F,
            0x09 => self.latched.minutes & 0x3F,
            0x0A => self.latched.hours & 0x1F,
            0x0B => (self.latched.days & 0xFF) as u8,
            0x0C => self.latched.day_high(),
            _ => 0xFF,
        }
    }

    fn write(&mut self, reg: u8, val: u8) {
        match reg {
            0x08 => {
                self.live.seconds = val & 0x3F;
                self.subsecond_cycles = 0;
            }
            0x09 => self.live.minutes = val & 0x3F,
            0x0A => self.live.hours = val & 0x1F,
            0x0B => self.live.days = (self.live.days & 0x0100) | val as u16,
            0x0C => {
                self.live.days = (self.live.days & 0x00FF) | (((val & 0x01) as u16) << 8);
                self.live.halt = val & 0x40 != 0;
                self.live.carry = val & 0x80 != 0;
            }
            _ => {}
        }
        self.latch();
    }

    fn step(&mut self, cycles: u32) {
        if self.live.halt {
            return;
        }
        self.subsecond_cycles += cycles;
        while self.subsecond_cycles >= RTC_CYCLES_PER_SECOND {
            self.subsecond_cycles -= RTC_CYCLES_PER_SECOND;
            self.tick_second();
        }
    }

    fn tick_second(&mut self) {
        // Registers wrap at their physical width, so out-of-range values
        // written by software tick through without carrying.
        self.live.seconds = (self.live.seconds + 1) & 0x3F;
        if self.live.seconds != 60 {
            return;
        }
        self.live.seconds = 0;
        self.live.minutes = (self.live.minutes + 1) & 0x3F;
        if self.live.minutes != 60 {
            return;
        }
        self.live.minutes = 0;
        self.live.hours = (self.live.hours + 1) & 0x1F;
        if self.live.hours != 24 {
            return;
        }
        self.live.hours = 0;
        if self.live.days == 0x01FF {
            self.live.days = 0;
            self.live.carry = true;
        } else {
            self.live.days += 1;
        }
    }
}

pub struct Cartridge {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub title: String,
    kind: MbcKind,
    cart_type: u8,
    save_path: Option<PathBuf>,
    ram_dirty: bool,
    mbc: MbcState,
}

impl Cartridge {
    /// Build a cartridge from a raw ROM image. The image is validated
    /// against the size limits, padded with 0xFF up to the size its header
    /// declares, and probed for the MBC1 multicart wiring.
    pub fn from_bytes(mut rom: Vec<u8>) -> Result<Self, LoadError> {
        if rom.len() < HEADER_END {
            return Err(LoadError::TooSmall(rom.len()));
        }
        if rom.len() > MAX_ROM_SIZE {
            return Err(LoadError::TooLarge(rom.len()));
        }

        let header = Header::new(&rom);
        let declared = header.rom_size();
        if rom.len() < declared {
            warn!(
                "ROM smaller than its header declares ({} < {} bytes), padding with 0xFF",
                rom.len(),
                declared
            );
            rom.resize(declared, 0xFF);
        } else if rom.len() > declared {
            warn!(
                "ROM larger than its header declares ({} > {} bytes)",
                rom.len(),
                declared
            );
        }

        let header = Header::new(&rom);
        if !header.checksum_ok() {
            warn!("cartridge header checksum mismatch");
        }

        let kind = header.mbc_kind();
        let cart_type = header.cart_type();
        let title = header.title();
        let ram_size = header.ram_size();
        let has_rtc = matches!(cart_type, 0x0F | 0x10);

        let mbc = match kind {
            MbcKind::None => MbcState::None,
            MbcKind::Mbc1 => MbcState::Mbc1 {
                bank1: 1,
                bank2: 0,
                mode: false,
                ram_enable: false,
                multicart: detect_mbc1_multicart(&rom),
            },
            MbcKind::Mbc2 => MbcState::Mbc2 {
                rom_bank: 1,
                ram_enable: false,
            },
            MbcKind::Mbc3 => MbcState::Mbc3 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
                rtc: if has_rtc { Some(Rtc::new()) } else { None },
                latch_armed: false,
            },
            MbcKind::Mbc5 => MbcState::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
            },
        };

        Ok(Self {
            rom,
            ram: vec![0; ram_size],
            title,
            kind,
            cart_type,
            save_path: None,
            ram_dirty: false,
            mbc,
        })
    }

    /// Load a ROM file. Battery cartridges derive a `.sav` path next to the
    /// ROM and pull existing save contents into cartridge RAM.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let mut cart = Self::from_bytes(data)?;

        if cart.has_battery() {
            let save = path.with_extension("sav");
            if let Ok(bytes) = fs::read(&save) {
                for (dst, src) in cart.ram.iter_mut().zip(bytes.iter()) {
                    *dst = *src;
                }
            }
            cart.save_path = Some(save);
        }

        info!(
            "loaded ROM \"{}\" ({:?}, {} KiB ROM, {} KiB RAM{})",
            cart.title,
            cart.kind,
            cart.rom.len() / 1024,
            cart.ram.len() / 1024,
            if cart.has_battery() { ", battery" } else { "" },
        );
        Ok(cart)
    }

    pub fn kind(&self) -> MbcKind {
        self.kind
    }

    pub fn has_battery(&self) -> bool {
        matches!(
            self.cart_type,
            0x03 | 0x06 | 0x09 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E
        )
    }

    /// Advance the RTC, if this cartridge has one.
    pub fn step_rtc(&mut self, cycles: u32) {
        if let MbcState::Mbc3 { rtc: Some(rtc), .. } = &mut self.mbc {
            rtc.step(cycles);
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x3FFF => {
                let bank = self.fixed_region_bank();
                self.rom_byte(bank, addr as usize)
            }
            0x4000..=0x7FFF => {
                let bank = self.switchable_region_bank();
                self.rom_byte(bank, addr as usize - 0x4000)
            }
            0xA000..=0xBFFF => self.read_ram(addr),
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => self.write_control(addr, val),
            0xA000..=0xBFFF => self.write_ram(addr, val),
            _ => {}
        }
    }

    /// Persist cartridge RAM to the save file, when this cartridge has a
    /// battery and RAM was written since load.
    pub fn save_ram(&mut self) -> io::Result<()> {
        if !self.has_battery() || !self.ram_dirty {
            return Ok(());
        }
        if let Some(path) = &self.save_path {
            fs::write(path, &self.ram)?;
            info!("wrote battery save {}", path.display());
            self.ram_dirty = false;
        }
        Ok(())
    }

    fn rom_bank_count(&self) -> usize {
        (self.rom.len() / ROM_BANK_SIZE).max(1)
    }

    /// Address-line mask for the computed ROM bank. Bank counts are powers
    /// of two after the loader pads to the header-declared size.
    fn rom_bank_mask(&self) -> usize {
        self.rom_bank_count().next_power_of_two() - 1
    }

    fn ram_bank_count(&self) -> usize {
        self.ram.len().div_ceil(RAM_BANK_SIZE)
    }

    /// Bank feeding 0x0000-0x3FFF. Bank 0 except for MBC1 advanced mode,
    /// where BANK2 drives the upper bank bits even here.
    fn fixed_region_bank(&self) -> usize {
        match &self.mbc {
            MbcState::Mbc1 {
                bank2,
                mode: true,
                multicart,
                ..
            } => {
                let shift = if *multicart { 4 } else { 5 };
                ((*bank2 as usize) << shift) & self.rom_bank_mask()
            }
            _ => 0,
        }
    }

    /// Bank feeding 0x4000-0x7FFF. The computed bank is ANDed with
    /// bank_count - 1, mirroring the address-line wiring rather than a
    /// modulo.
    fn switchable_region_bank(&self) -> usize {
        let mask = self.rom_bank_mask();
        match &self.mbc {
            MbcState::None => 1 & mask,
            MbcState::Mbc1 {
                bank1,
                bank2,
                multicart,
                ..
            } => {
                // The zero substitution looks only at the 5-bit BANK1 value.
                let low = if *bank1 == 0 { 1 } else { *bank1 as usize };
                let bank = if *multicart {
                    (low & 0x0F) | ((*bank2 as usize) << 4)
                } else {
                    low | ((*bank2 as usize) << 5)
                };
                bank & mask
            }
            MbcState::Mbc2 { rom_bank, .. } => (*rom_bank as usize) & mask,
            MbcState::Mbc3 { rom_bank, .. } => (*rom_bank as usize) & mask,
            MbcState::Mbc5 { rom_bank, .. } => (*rom_bank as usize) & mask,
        }
    }

    fn rom_byte(&self, bank: usize, offset: usize) -> u8 {
        self.rom
            .get(bank * ROM_BANK_SIZE + offset)
            .copied()
            .unwrap_or(0xFF)
    }

    fn write_control(&mut self, addr: u16, val: u8) {
        match &mut self.mbc {
            MbcState::None => {}
            MbcState::Mbc1 {
                bank1,
                bank2,
                mode,
                ram_enable,
                ..
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x3FFF => *bank1 = val & 0x1F,
                0x4000..=0x5FFF => *bank2 = val & 0x03,
                _ => *mode = val & 0x01 != 0,
            },
            MbcState::Mbc2 {
                rom_bank,
                ram_enable,
            } => {
                // Address bit 8 picks the target register over the whole
                // 0x0000-0x3FFF range.
                if addr < 0x4000 {
                    if addr & 0x0100 == 0 {
                        *ram_enable = val & 0x0F == 0x0A;
                    } else {
                        *rom_bank = val & 0x0F;
                        if *rom_bank == 0 {
                            *rom_bank = 1;
                        }
                    }
                }
            }
            MbcState::Mbc3 {
                rom_bank,
                ram_bank,
                ram_enable,
                rtc,
                latch_armed,
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x3FFF => {
                    *rom_bank = val & 0x7F;
                    if *rom_bank == 0 {
                        *rom_bank = 1;
                    }
                }
                0x4000..=0x5FFF => *ram_bank = val,
                _ => {
                    if val == 0x00 {
                        *latch_armed = true;
                    } else {
                        if val == 0x01 && *latch_armed {
                            if let Some(rtc) = rtc {
                                rtc.latch();
                            }
                        }
                        *latch_armed = false;
                    }
                }
            },
            MbcState::Mbc5 {
                rom_bank,
                ram_bank,
                ram_enable,
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x2FFF => *rom_bank = (*rom_bank & 0x100) | val as u16,
                0x3000..=0x3FFF => *rom_bank = (*rom_bank & 0x0FF) | (((val & 0x01) as u16) << 8),
                0x4000..=0x5FFF => *ram_bank = val & 0x0F,
                _ => {}
            },
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        match &self.mbc {
            MbcState::None => self
                .ram
                .get(addr as usize - 0xA000)
                .copied()
                .unwrap_or(0xFF),
            MbcState::Mbc1 { ram_enable, .. } => {
                if !*ram_enable {
                    return 0xFF;
                }
                self.ram
                    .get(self.mbc1_ram_index(addr))
                    .copied()
                    .unwrap_or(0xFF)
            }
            MbcState::Mbc2 { ram_enable, .. } => {
                if !*ram_enable {
                    return 0xFF;
                }
                // 512 half-bytes, mirrored; the upper nibble is undriven.
                let nibble = self
                    .ram
                    .get((addr as usize - 0xA000) & 0x01FF)
                    .copied()
                    .unwrap_or(0x0F);
                0xF0 | (nibble & 0x0F)
            }
            MbcState::Mbc3 {
                ram_bank,
                ram_enable,
                rtc,
                ..
            } => {
                if !*ram_enable {
                    return 0xFF;
                }
                match *ram_bank {
                    0x00..=0x03 => {
                        let bank = self.masked_ram_bank(*ram_bank);
                        self.ram
                            .get(bank * RAM_BANK_SIZE + addr as usize - 0xA000)
                            .copied()
                            .unwrap_or(0xFF)
                    }
                    0x08..=0x0C => rtc.as_ref().map(|r| r.read(*ram_bank)).unwrap_or(0xFF),
                    _ => 0xFF,
                }
            }
            MbcState::Mbc5 {
                ram_bank,
                ram_enable,
                ..
            } => {
                if !*ram_enable {
                    return 0xFF;
                }
                let bank = self.masked_ram_bank(*ram_bank);
                self.ram
                    .get(bank * RAM_BANK_SIZE + addr as usize - 0xA000)
                    .copied()
                    .unwrap_or(0xFF)
            }
        }
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        // Resolve the target without holding a borrow of the MBC state, so
        // the RAM mutation below can see the whole cartridge.
        enum Target {
            None,
            Ram(usize),
            Nibble(usize),
            Rtc(u8),
        }

        let target = match &self.mbc {
            MbcState::None => Target::Ram(addr as usize - 0xA000),
            MbcState::Mbc1 { ram_enable, .. } => {
                if *ram_enable {
                    Target::Ram(self.mbc1_ram_index(addr))
                } else {
                    Target::None
                }
            }
            MbcState::Mbc2 { ram_enable, .. } => {
                if *ram_enable {
                    Target::Nibble((addr as usize - 0xA000) & 0x01FF)
                } else {
                    Target::None
                }
            }
            MbcState::Mbc3 {
                ram_bank,
                ram_enable,
                ..
            } => {
                if !*ram_enable {
                    Target::None
                } else {
                    match *ram_bank {
                        0x00..=0x03 => {
                            let bank = self.masked_ram_bank(*ram_bank);
                            Target::Ram(bank * RAM_BANK_SIZE + addr as usize - 0xA000)
                        }
                        0x08..=0x0C => Target::Rtc(*ram_bank),
                        _ => Target::None,
                    }
                }
            }
            MbcState::Mbc5 {
                ram_bank,
                ram_enable,
                ..
            } => {
                if *ram_enable {
                    let bank = self.masked_ram_bank(*ram_bank);
                    Target::Ram(bank * RAM_BANK_SIZE + addr as usize - 0xA000)
                } else {
                    Target::None
                }
            }
        };

        match target {
            Target::None => {}
            Target::Ram(index) => {
                if let Some(b) = self.ram.get_mut(index) {
                    *b = val;
                    self.ram_dirty = true;
                }
            }
            Target::Nibble(index) => {
                if let Some(b) = self.ram.get_mut(index) {
                    *b = val & 0x0F;
                    self.ram_dirty = true;
                }
            }
            Target::Rtc(reg) => {
                if let MbcState::Mbc3 { rtc: Some(rtc), .. } = &mut self.mbc {
                    rtc.write(reg, val);
                }
            }
        }
    }

    fn mbc1_ram_index(&self, addr: u16) -> usize {
        match &self.mbc {
            MbcState::Mbc1 { bank2, mode, .. } => {
                let bank = if *mode {
                    self.masked_ram_bank(*bank2)
                } else {
                    0
                };
                bank * RAM_BANK_SIZE + addr as usize - 0xA000
            }
            _ => addr as usize - 0xA000,
        }
    }

    /// RAM bank number after the address-line AND mask.
    fn masked_ram_bank(&self, bank: u8) -> usize {
        let count = self.ram_bank_count();
        if count == 0 {
            return 0;
        }
        bank as usize & (count.next_power_of_two() - 1)
    }
}

/// Multicart boards can't be told apart from plain MBC1 by the type byte;
/// a second logo copy at the start of physical bank 0x10 is the telltale.
fn detect_mbc1_multicart(rom: &[u8]) -> bool {
    if rom.len() < 0x100000 {
        return false;
    }
    rom.get(0x40104..0x40104 + HEADER_LOGO.len())
        .map(|probe| probe == HEADER_LOGO)
        .unwrap_or(false)
}

struct Header<'a> {
    data: &'a [u8],
}

impl<'a> Header<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn title(&self) -> String {
        let mut out = String::new();
        for &b in &self.data[0x134..0x144] {
            if b == 0 {
                break;
            }
            if (0x20..0x7F).contains(&b) {
                out.push(b as char);
            }
        }
        out.trim().to_string()
    }

    fn cart_type(&self) -> u8 {
        self.data[0x147]
    }

    fn mbc_kind(&self) -> MbcKind {
        match self.cart_type() {
            0x01..=0x03 => MbcKind::Mbc1,
            0x05 | 0x06 => MbcKind::Mbc2,
            0x0F..=0x13 => MbcKind::Mbc3,
            0x19..=0x1E => MbcKind::Mbc5,
            _ => MbcKind::None,
        }
    }

    fn rom_size(&self) -> usize {
        let code = self.data[0x148];
        if code <= 0x08 {
            (32 * 1024) << code
        } else {
            32 * 1024
        }
    }

    fn ram_size(&self) -> usize {
        // MBC2 brings its own 512x4-bit array regardless of the RAM code.
        if matches!(self.cart_type(), 0x05 | 0x06) {
            return 0x200;
        }
        match self.data[0x149] {
            0x01 => 0x800,
            0x02 => 0x2000,
            0x03 => 0x8000,
            0x04 => 0x20000,
            0x05 => 0x10000,
            _ => 0,
        }
    }

    fn checksum_ok(&self) -> bool {
        let mut sum = 0u8;
        for &b in &self.data[0x134..0x14D] {
            sum = sum.wrapping_sub(b).wrapping_sub(1);
        }
        sum == self.data[0x14D]
    }
}
