use dotmatrix_core::Machine;

/// Build a 32 KiB no-MBC ROM image with `code` placed at the entry point.
#[allow(dead_code)]
pub fn rom_with_code(code: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x100..0x100 + code.len()].copy_from_slice(code);
    rom
}

/// Post-boot machine with `code` at 0x0100.
#[allow(dead_code)]
pub fn machine_with(code: &[u8]) -> Machine {
    let mut machine = Machine::new();
    machine
        .load_rom_bytes(rom_with_code(code))
        .expect("synthetic ROM should load");
    machine
}

/// A banked ROM image with each 16 KiB bank stamped with its own number at
/// offset 0.
#[allow(dead_code)]
pub fn banked_rom(cart_type: u8, rom_code: u8, ram_code: u8) -> Vec<u8> {
    let banks = 2usize << rom_code;
    let mut rom = vec![0u8; banks * 0x4000];
    rom[0x147] = cart_type;
    rom[0x148] = rom_code;
    rom[0x149] = ram_code;
    for bank in 0..banks {
        rom[bank * 0x4000] = bank as u8;
    }
    rom
}
