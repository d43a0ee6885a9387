//! QQ Music's triple-DES variant.
//!
//! The cipher is a DES derivative with its own S-box tables and a skewed
//! key-compression step, so no standard DES implementation produces the
//! same output. Blocks are processed in ECB mode.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Mode {
    Encrypt,
    Decrypt,
}

type RoundKeys = [[u8; 6]; 16];

const SBOX: [[u8; 64]; 8] = [
    [
        14, 4, 13, 1, 2, 15, 11, 8, 3, 10, 6, 12, 5, 9, 0, 7, //
        0, 15, 7, 4, 14, 2, 13, 1, 10, 6, 12, 11, 9, 5, 3, 8, //
        4, 1, 14, 8, 13, 6, 2, 11, 15, 12, 9, 7, 3, 10, 5, 0, //
        15, 12, 8, 2, 4, 9, 1, 7, 5, 11, 3, 14, 10, 0, 6, 13,
    ],
    [
        15, 1, 8, 14, 6, 11, 3, 4, 9, 7, 2, 13, 12, 0, 5, 10, //
        3, 13, 4, 7, 15, 2, 8, 15, 12, 0, 1, 10, 6, 9, 11, 5, //
        0, 14, 7, 11, 10, 4, 13, 1, 5, 8, 12, 6, 9, 3, 2, 15, //
        13, 8, 10, 1, 3, 15, 4, 2, 11, 6, 7, 12, 0, 5, 14, 9,
    ],
    [
        10, 0, 9, 14, 6, 3, 15, 5, 1, 13, 12, 7, 11, 4, 2, 8, //
        13, 7, 0, 9, 3, 4, 6, 10, 2, 8, 5, 14, 12, 11, 15, 1, //
        13, 6, 4, 9, 8, 15, 3, 0, 11, 1, 2, 12, 5, 10, 14, 7, //
        1, 10, 13, 0, 6, 9, 8, 7, 4, 15, 14, 3, 11, 5, 2, 12,
    ],
    [
        7, 13, 14, 3, 0, 6, 9, 10, 1, 2, 8, 5, 11, 12, 4, 15, //
        13, 8, 11, 5, 6, 15, 0, 3, 4, 7, 2, 12, 1, 10, 14, 9, //
        10, 6, 9, 0, 12, 11, 7, 13, 15, 1, 3, 14, 5, 2, 8, 4, //
        3, 15, 0, 6, 10, 10, 13, 8, 9, 4, 5, 11, 12, 7, 2, 14,
    ],
    [
        2, 12, 4, 1, 7, 10, 11, 6, 8, 5, 3, 15, 13, 0, 14, 9, //
        14, 11, 2, 12, 4, 7, 13, 1, 5, 0, 15, 10, 3, 9, 8, 6, //
        4, 2, 1, 11, 10, 13, 7, 8, 15, 9, 12, 5, 6, 3, 0, 14, //
        11, 8, 12, 7, 1, 14, 2, 13, 6, 15, 0, 9, 10, 4, 5, 3,
    ],
    [
        12, 1, 10, 15, 9, 2, 6, 8, 0, 13, 3, 4, 14, 7, 5, 11, //
        10, 15, 4, 2, 7, 12, 9, 5, 6, 1, 13, 14, 0, 11, 3, 8, //
        9, 14, 15, 5, 2, 8, 12, 3, 7, 0, 4, 10, 1, 13, 11, 6, //
        4, 3, 2, 12, 9, 5, 15, 10, 11, 14, 1, 7, 6, 0, 8, 13,
    ],
    [
        4, 11, 2, 14, 15, 0, 8, 13, 3, 12, 9, 7, 5, 10, 6, 1, //
        13, 0, 11, 7, 4, 9, 1, 10, 14, 3, 5, 12, 2, 15, 8, 6, //
        1, 4, 11, 13, 12, 3, 7, 14, 10, 15, 6, 8, 0, 5, 9, 2, //
        6, 11, 13, 8, 1, 4, 10, 7, 9, 5, 0, 15, 14, 2, 3, 12,
    ],
    [
        13, 2, 8, 4, 6, 15, 11, 1, 10, 9, 3, 14, 5, 0, 12, 7, //
        1, 15, 13, 8, 10, 3, 7, 4, 12, 5, 6, 11, 0, 14, 9, 2, //
        7, 11, 4, 1, 9, 12, 14, 2, 0, 6, 10, 13, 15, 3, 5, 8, //
        2, 1, 14, 7, 4, 10, 8, 13, 15, 12, 9, 0, 3, 5, 6, 11,
    ],
];

const KEY_ROUND_SHIFT: [u32; 16] = [1, 1, 2, 2, 2, 2, 2, 2, 1, 2, 2, 2, 2, 2, 2, 1];

const KEY_PERM_C: [usize; 28] = [
    56, 48, 40, 32, 24, 16, 8, 0, 57, 49, 41, 33, 25, 17, 9, 1, 58, 50, 42, 34, 26, 18, 10, 2,
    59, 51, 43, 35,
];

const KEY_PERM_D: [usize; 28] = [
    62, 54, 46, 38, 30, 22, 14, 6, 61, 53, 45, 37, 29, 21, 13, 5, 60, 52, 44, 36, 28, 20, 12, 4,
    27, 19, 11, 3,
];

// The D half is indexed with an offset of 27 rather than 28.
const KEY_COMPRESSION: [u32; 48] = [
    13, 16, 10, 23, 0, 4, 2, 27, 14, 5, 20, 9, 22, 18, 11, 3, 25, 7, 15, 6, 26, 19, 12, 1, 40, 51,
    30, 36, 46, 54, 29, 39, 50, 44, 32, 47, 43, 48, 38, 55, 33, 52, 45, 41, 49, 35, 28, 31,
];

const INITIAL_PERM: [usize; 32] = [
    57, 49, 41, 33, 25, 17, 9, 1, 59, 51, 43, 35, 27, 19, 11, 3, 61, 53, 45, 37, 29, 21, 13, 5,
    63, 55, 47, 39, 31, 23, 15, 7,
];

const ROUND_PERM: [u32; 32] = [
    15, 6, 19, 20, 28, 11, 27, 16, 0, 14, 22, 25, 4, 17, 30, 9, 1, 7, 23, 13, 31, 26, 2, 8, 18, 12,
    29, 5, 21, 10, 3, 24,
];

/// Bit `b` of the block, where bytes are addressed little-endian within each 32-bit word.
fn bit_num(block: &[u8; 8], b: usize, c: u32) -> u32 {
    let byte = block[(b / 32) * 4 + 3 - (b % 32) / 8];
    (((byte >> (7 - b % 8)) & 1) as u32) << c
}

fn bit_num_intr(a: u32, b: u32, c: u32) -> u32 {
    ((a >> (31 - b)) & 1) << c
}

fn bit_num_intl(a: u32, b: u32, c: u32) -> u32 {
    (a.wrapping_shl(b) & 0x8000_0000) >> c
}

fn sbox_bit(a: u8) -> usize {
    ((a & 0x20) | ((a & 0x1f) >> 1) | ((a & 0x01) << 4)) as usize
}

fn key_schedule(key: &[u8], mode: Mode) -> RoundKeys {
    let mut block = [0u8; 8];
    block.copy_from_slice(&key[..8]);

    let mut c = 0u32;
    let mut d = 0u32;
    for (i, (&pc, &pd)) in KEY_PERM_C.iter().zip(KEY_PERM_D.iter()).enumerate() {
        c |= bit_num(&block, pc, 31 - i as u32);
        d |= bit_num(&block, pd, 31 - i as u32);
    }

    let mut schedule = [[0u8; 6]; 16];
    for (i, &shift) in KEY_ROUND_SHIFT.iter().enumerate() {
        c = ((c << shift) | (c >> (28 - shift))) & 0xffff_fff0;
        d = ((d << shift) | (d >> (28 - shift))) & 0xffff_fff0;

        let round = match mode {
            Mode::Decrypt => 15 - i,
            Mode::Encrypt => i,
        };
        let mut sub = [0u8; 6];
        for (j, &k) in KEY_COMPRESSION.iter().enumerate() {
            let bit = if j < 24 {
                bit_num_intr(c, k, 7 - (j % 8) as u32)
            } else {
                bit_num_intr(d, k - 27, 7 - (j % 8) as u32)
            };
            sub[j / 8] |= bit as u8;
        }
        schedule[round] = sub;
    }
    schedule
}

fn initial_permutation(block: &[u8; 8]) -> (u32, u32) {
    let mut s0 = 0u32;
    let mut s1 = 0u32;
    for (k, &src) in INITIAL_PERM.iter().enumerate() {
        s0 |= bit_num(block, src, 31 - k as u32);
        s1 |= bit_num(block, src - 1, 31 - k as u32);
    }
    (s0, s1)
}

fn inverse_permutation(s0: u32, s1: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    for b in 0..8u32 {
        let mut v = 0u32;
        for r in 0..4u32 {
            v |= bit_num_intr(s1, b + 8 * r, 7 - 2 * r) | bit_num_intr(s0, b + 8 * r, 6 - 2 * r);
        }
        out[((b + 4) % 8) as usize] = v as u8;
    }
    out
}

fn feistel(state: u32, key: &[u8; 6]) -> u32 {
    let t1 = bit_num_intl(state, 31, 0)
        | ((state & 0xf000_0000) >> 1)
        | bit_num_intl(state, 4, 5)
        | bit_num_intl(state, 3, 6)
        | ((state & 0x0f00_0000) >> 3)
        | bit_num_intl(state, 8, 11)
        | bit_num_intl(state, 7, 12)
        | ((state & 0x00f0_0000) >> 5)
        | bit_num_intl(state, 12, 17)
        | bit_num_intl(state, 11, 18)
        | ((state & 0x000f_0000) >> 7)
        | bit_num_intl(state, 16, 23);

    let t2 = bit_num_intl(state, 15, 0)
        | ((state & 0x0000_f000) << 15)
        | bit_num_intl(state, 20, 5)
        | bit_num_intl(state, 19, 6)
        | ((state & 0x0000_0f00) << 13)
        | bit_num_intl(state, 24, 11)
        | bit_num_intl(state, 23, 12)
        | ((state & 0x0000_00f0) << 11)
        | bit_num_intl(state, 28, 17)
        | bit_num_intl(state, 27, 18)
        | ((state & 0x0000_000f) << 9)
        | bit_num_intl(state, 0, 23);

    let mut lrg = [
        (t1 >> 24) as u8,
        (t1 >> 16) as u8,
        (t1 >> 8) as u8,
        (t2 >> 24) as u8,
        (t2 >> 16) as u8,
        (t2 >> 8) as u8,
    ];
    for (b, k) in lrg.iter_mut().zip(key.iter()) {
        *b ^= k;
    }

    let six_bit_groups = [
        lrg[0] >> 2,
        ((lrg[0] & 0x03) << 4) | (lrg[1] >> 4),
        ((lrg[1] & 0x0f) << 2) | (lrg[2] >> 6),
        lrg[2] & 0x3f,
        lrg[3] >> 2,
        ((lrg[3] & 0x03) << 4) | (lrg[4] >> 4),
        ((lrg[4] & 0x0f) << 2) | (lrg[5] >> 6),
        lrg[5] & 0x3f,
    ];
    let mut substituted = 0u32;
    for (i, group) in six_bit_groups.into_iter().enumerate() {
        substituted |= (SBOX[i][sbox_bit(group)] as u32) << (28 - 4 * i);
    }

    ROUND_PERM
        .iter()
        .enumerate()
        .fold(0u32, |acc, (c, &src)| acc | bit_num_intl(substituted, src, c as u32))
}

fn crypt_block(block: &[u8; 8], keys: &RoundKeys) -> [u8; 8] {
    let (mut s0, mut s1) = initial_permutation(block);
    for key in &keys[..15] {
        let t = s1;
        s1 = feistel(s1, key) ^ s0;
        s0 = t;
    }
    s0 ^= feistel(s1, &keys[15]);
    inverse_permutation(s0, s1)
}

/// Expanded key material for the three DES passes.
pub(crate) struct TripleDes {
    passes: [RoundKeys; 3],
}

impl TripleDes {
    /// `key` must hold 24 bytes.
    pub(crate) fn new(key: &[u8; 24], mode: Mode) -> Self {
        let passes = match mode {
            Mode::Encrypt => [
                key_schedule(&key[0..8], Mode::Encrypt),
                key_schedule(&key[8..16], Mode::Decrypt),
                key_schedule(&key[16..24], Mode::Encrypt),
            ],
            Mode::Decrypt => [
                key_schedule(&key[16..24], Mode::Decrypt),
                key_schedule(&key[8..16], Mode::Encrypt),
                key_schedule(&key[0..8], Mode::Decrypt),
            ],
        };
        Self { passes }
    }

    pub(crate) fn crypt_block(&self, block: &[u8; 8]) -> [u8; 8] {
        self.passes
            .iter()
            .fold(*block, |data, keys| crypt_block(&data, keys))
    }

    /// Process `data` block by block in place. Trailing bytes that do not
    /// fill a block are left untouched; callers check alignment first.
    pub(crate) fn crypt_in_place(&self, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(8) {
            let mut block = [0u8; 8];
            block.copy_from_slice(chunk);
            chunk.copy_from_slice(&self.crypt_block(&block));
        }
    }
}
