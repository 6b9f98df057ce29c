mod common;

use common::machine_with;

const FLAG_Z: u8 = 0x80;
const FLAG_N: u8 = 0x40;
const FLAG_H: u8 = 0x20;
const FLAG_C: u8 = 0x10;

fn flags(m: &dotmatrix_core::Machine) -> u8 {
    m.cpu.f & 0xF0
}

#[test]
fn adc_boundary_cases() {
    // 0xFF + 0x00 + carry = 0x00 with Z, H, C.
    let mut m = machine_with(&[0x37, 0x3E, 0xFF, 0xCE, 0x00]); // SCF / LD A / ADC 0
    m.step();
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x00);
    assert_eq!(flags(&m), FLAG_Z | FLAG_H | FLAG_C);

    // 0x0F + 0x00 + carry = 0x10 with only H.
    let mut m = machine_with(&[0x37, 0x3E, 0x0F, 0xCE, 0x00]);
    m.step();
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x10);
    assert_eq!(flags(&m), FLAG_H);
}

#[test]
fn sbc_boundary_cases() {
    // 0x00 - 0x00 - carry = 0xFF with N, H, C.
    let mut m = machine_with(&[0x37, 0x3E, 0x00, 0xDE, 0x00]); // SCF / LD A,0 / SBC 0
    m.step();
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0xFF);
    assert_eq!(flags(&m), FLAG_N | FLAG_H | FLAG_C);

    // 0x10 - 0x0F = 0x01: half borrow only.
    let mut m = machine_with(&[0x3E, 0x10, 0xD6, 0x0F]);
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x01);
    assert_eq!(flags(&m), FLAG_N | FLAG_H);
}

#[test]
fn cp_equal_sets_zero_and_subtract() {
    let mut m = machine_with(&[0x3E, 0x42, 0xFE, 0x42]);
    m.step();
    m.step();
    assert_eq!(flags(&m), FLAG_Z | FLAG_N);
}

#[test]
fn logical_op_flag_patterns() {
    // AND always sets H.
    let mut m = machine_with(&[0x3E, 0xF0, 0xE6, 0x0F]);
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x00);
    assert_eq!(flags(&m), FLAG_Z | FLAG_H);

    // OR and XOR clear everything but Z.
    let mut m = machine_with(&[0x3E, 0x0F, 0xF6, 0xF0]);
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0xFF);
    assert_eq!(flags(&m), 0);

    let mut m = machine_with(&[0x3E, 0xAA, 0xEE, 0xAA]);
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x00);
    assert_eq!(flags(&m), FLAG_Z);
}

#[test]
fn cpl_scf_ccf() {
    // CPL sets N and H, preserves Z and C.
    let mut m = machine_with(&[0x37, 0x3E, 0x3C, 0x2F]); // SCF / LD A / CPL
    m.step();
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0xC3);
    assert_eq!(flags(&m) & (FLAG_N | FLAG_H), FLAG_N | FLAG_H);
    assert_eq!(flags(&m) & FLAG_C, FLAG_C);

    // CCF flips carry and clears N/H.
    let mut m = machine_with(&[0x37, 0x3F, 0x3F]);
    m.step();
    m.step();
    assert_eq!(flags(&m) & FLAG_C, 0);
    m.step();
    assert_eq!(flags(&m) & FLAG_C, FLAG_C);
    assert_eq!(flags(&m) & (FLAG_N | FLAG_H), 0);
}

#[test]
fn inc_dec_half_carry_edges() {
    let mut m = machine_with(&[0x3E, 0xFF, 0x3C]); // INC A over 0xFF
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x00);
    assert_eq!(flags(&m) & (FLAG_Z | FLAG_H), FLAG_Z | FLAG_H);

    let mut m = machine_with(&[0x3E, 0x00, 0x3D]); // DEC A under 0x00
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0xFF);
    assert_eq!(flags(&m) & (FLAG_N | FLAG_H), FLAG_N | FLAG_H);
    assert_eq!(flags(&m) & FLAG_Z, 0);
}

#[test]
fn sixteen_bit_inc_dec_wrap_without_flags() {
    let mut m = machine_with(&[0x01, 0xFF, 0xFF, 0x03]); // LD BC,0xFFFF / INC BC
    let f = m.cpu.f;
    m.step();
    m.step();
    assert_eq!(m.cpu.bc(), 0x0000);
    assert_eq!(m.cpu.f, f, "16-bit INC touches no flags");

    let mut m = machine_with(&[0x11, 0x00, 0x00, 0x1B]); // LD DE,0 / DEC DE
    m.step();
    m.step();
    assert_eq!(m.cpu.de(), 0xFFFF);
}

#[test]
fn add_hl_carry_chain() {
    // 0x8000 + 0x8000 overflows into C; Z is preserved from before.
    let mut m = machine_with(&[
        0xAF, // XOR A: set Z
        0x21, 0x00, 0x80, // LD HL,0x8000
        0x01, 0x00, 0x80, // LD BC,0x8000
        0x09, // ADD HL,BC
    ]);
    for _ in 0..4 {
        m.step();
    }
    assert_eq!(m.cpu.hl(), 0x0000);
    assert_eq!(flags(&m) & FLAG_C, FLAG_C);
    assert_eq!(flags(&m) & FLAG_Z, FLAG_Z, "Z untouched by ADD HL");
    assert_eq!(flags(&m) & FLAG_N, 0);

    // Half carry out of bit 11.
    let mut m = machine_with(&[
        0x21, 0x00, 0x0F, // LD HL,0x0F00
        0x01, 0x00, 0x01, // LD BC,0x0100
        0x09,
    ]);
    for _ in 0..3 {
        m.step();
    }
    assert_eq!(m.cpu.hl(), 0x1000);
    assert_eq!(flags(&m) & FLAG_H, FLAG_H);
}

#[test]
fn rotate_through_carry_chain() {
    // OR A scrubs the post-boot carry first. RRA on A=0x01: A=0, C=1,
    // Z never set.
    let mut m = machine_with(&[0x3E, 0x01, 0xB7, 0x1F]);
    m.step();
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x00);
    assert_eq!(flags(&m), FLAG_C);

    // A second RRA pulls the carry into bit 7.
    let mut m = machine_with(&[0x3E, 0x01, 0xB7, 0x1F, 0x1F]);
    for _ in 0..4 {
        m.step();
    }
    assert_eq!(m.cpu.a, 0x80);
    assert_eq!(flags(&m), 0);
}

#[test]
fn cb_shift_family() {
    // SRA keeps the sign bit.
    let mut m = machine_with(&[0x3E, 0x81, 0xCB, 0x2F]); // SRA A
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0xC0);
    assert_eq!(flags(&m), FLAG_C);

    // SRL shifts zeroes in.
    let mut m = machine_with(&[0x3E, 0x81, 0xCB, 0x3F]); // SRL A
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x40);
    assert_eq!(flags(&m), FLAG_C);

    // SLA out of bit 7.
    let mut m = machine_with(&[0x3E, 0x80, 0xCB, 0x27]); // SLA A
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x00);
    assert_eq!(flags(&m), FLAG_Z | FLAG_C);

    // RLC wraps bit 7 to bit 0.
    let mut m = machine_with(&[0x3E, 0x80, 0xCB, 0x07]); // RLC A
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x01);
    assert_eq!(flags(&m), FLAG_C);

    // SWAP with zero result.
    let mut m = machine_with(&[0xAF, 0xCB, 0x37]); // XOR A / SWAP A
    m.step();
    m.step();
    assert_eq!(flags(&m), FLAG_Z);
}

#[test]
fn ld_a16_sp_is_little_endian() {
    let mut m = machine_with(&[
        0x31, 0x34, 0x12, // LD SP,0x1234
        0x08, 0x00, 0xC0, // LD (0xC000),SP
    ]);
    m.step();
    m.step();
    assert_eq!(m.bus.read_byte(0xC000), 0x34);
    assert_eq!(m.bus.read_byte(0xC001), 0x12);
}

#[test]
fn jr_negative_offset_loops() {
    let mut m = machine_with(&[0x18, 0xFE]); // JR -2
    m.step();
    assert_eq!(m.cpu.pc, 0x0100);
    m.step();
    assert_eq!(m.cpu.pc, 0x0100);
}

#[test]
fn daa_after_subtraction() {
    // BCD 0x42 - 0x15 = 0x27.
    let mut m = machine_with(&[0x3E, 0x42, 0xD6, 0x15, 0x27]);
    m.step();
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x27);
    assert_eq!(flags(&m) & FLAG_N, FLAG_N);
}

#[test]
fn daa_wraps_to_zero_with_carry() {
    // BCD 0x99 + 0x01 = 0x00 carry 1.
    let mut m = machine_with(&[0x3E, 0x99, 0xC6, 0x01, 0x27]);
    m.step();
    m.step();
    m.step();
    assert_eq!(m.cpu.a, 0x00);
    assert_eq!(flags(&m) & (FLAG_Z | FLAG_C), FLAG_Z | FLAG_C);
}

#[test]
fn hl_pointer_arithmetic_targets_memory() {
    let mut m = machine_with(&[
        0x21, 0x00, 0xC0, // LD HL,0xC000
        0x36, 0x0F, // LD (HL),0x0F
        0x34, // INC (HL)
        0x7E, // LD A,(HL)
    ]);
    for _ in 0..4 {
        m.step();
    }
    assert_eq!(m.cpu.a, 0x10);
    assert_eq!(flags(&m) & FLAG_H, FLAG_H);
}

#[test]
fn ldi_ldd_move_the_pointer() {
    let mut m = machine_with(&[
        0x21, 0x00, 0xC0, // LD HL,0xC000
        0x3E, 0x11, // LD A,0x11
        0x22, // LD (HL+),A
        0x22, // LD (HL+),A
        0x3A, // LD A,(HL-)
        0x2A, // LD A,(HL+)
    ]);
    for _ in 0..4 {
        m.step();
    }
    assert_eq!(m.cpu.hl(), 0xC002);
    m.step(); // LD A,(HL-): reads 0xC002 (zero)
    assert_eq!(m.cpu.a, 0x00);
    assert_eq!(m.cpu.hl(), 0xC001);
    m.step(); // LD A,(HL+): reads the second 0x11
    assert_eq!(m.cpu.a, 0x11);
    assert_eq!(m.cpu.hl(), 0xC002);
}
