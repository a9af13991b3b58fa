//! Identifier hashing: case-folded, NUL-skipping, with both the 32-bit
//! multiplicative-polynomial and 16-bit rotate-and-add variants from
//! `b1id.c`. Both guarantee no result below 256, so small hashes stay
//! reserved for internal tags.

use b1util::to_lower;
use b1util_derive::{KeywordFromStr, KeywordName};

/// Hashes below this value are reserved for internal tags (PRINT's TAB/SPC,
/// IIF/IIF$ short-circuit markers, statement keywords).
pub const RESERVED_HASH_CEILING: u32 = 256;

/// 32-bit multiplicative-polynomial hash, direct port of
/// `b1_id_calc_hash` under `B1_FEATURE_HASH_32BIT`.
pub fn hash32(data: &[u8]) -> u32 {
    let mut hash: u32 = 7;

    for &b in data {
        if b == 0 {
            continue;
        }
        let b = if b.is_ascii_alphabetic() { to_lower(b) } else { b };
        hash = hash.wrapping_mul(37).wrapping_add(b as u32);
    }

    if hash < RESERVED_HASH_CEILING {
        hash = hash
            .wrapping_mul(31)
            .wrapping_add(371u32.wrapping_mul(data.len() as u32));
    }

    hash
}

/// 16-bit rotate-and-add hash, direct port of `b1_id_calc_hash` under the
/// `else` (non-`B1_FEATURE_HASH_32BIT`) branch. Retries with the
/// accumulated hash as a new seed until the high byte is non-zero, which is
/// the post-condition guaranteeing hashes `>= 256`.
pub fn hash16(data: &[u8]) -> u16 {
    let mut hash: u16 = 0xFFFF;

    loop {
        for &b in data {
            if b == 0 {
                continue;
            }
            let b = if b.is_ascii_alphabetic() { to_lower(b) } else { b };
            hash = hash.wrapping_add(b as u16);
            let mixed = b ^ ((hash >> 8) as u8);
            hash = hash.wrapping_shl(5);
            hash = hash.wrapping_add(mixed as u16);
        }

        if (hash >> 8) as u8 != 0 {
            break;
        }
    }

    hash
}

/// Hashes `data` using whichever width `hash32` selects in `Features`.
pub fn hash(data: &[u8], use_32bit: bool) -> u32 {
    if use_32bit {
        hash32(data)
    } else {
        hash16(data) as u32
    }
}

/// The statement keywords recognized by the tokenizer, in the order their
/// hashes appear in the sorted lookup table below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, KeywordName, KeywordFromStr)]
pub enum StatementKeyword {
    If,
    On,
    Def,
    Dim,
    End,
    For,
    Let,
    Rem,
    Set,
    Data,
    Else,
    Goto,
    Next,
    Read,
    Stop,
    Wend,
    Option,
    Continue,
    Return,
    Break,
    Erase,
    Gosub,
    Input,
    Print,
    While,
    Restore,
    Randomize,
    ElseIf,
}

// (hash, keyword) pairs, sorted ascending by hash as in b1id.c's 32-bit
// table (the one matching Features::hash32 == true, our default).
const STATEMENT_KEYWORD_TABLE: &[(u32, StatementKeyword)] = {
    use StatementKeyword::*;
    &[
        (0x3502, If),
        (0x35e8, On),
        (0x78ece, Def),
        (0x78f69, Dim),
        (0x79572, End),
        (0x79afe, For),
        (0x7b9a4, Let),
        (0x7d9b3, Rem),
        (0x7df13, Set),
        (0x11790c9, Data),
        (0x1189158, Else),
        (0x11a2d4c, Goto),
        (0x11f6176, Next),
        (0x1227587, Read),
        (0x1238dad, Stop),
        (0x12654b9, Wend),
        (0x6299b68, Option),
        (0x769b140, Continue),
        (0x11559a27, Return),
        (0x283b8f0c, Break),
        (0x2891470f, Erase),
        (0x28c887e3, Gosub),
        (0x2900e3ef, Input),
        (0x29cc0388, Print),
        (0x2a8c7724, While),
        (0x8141d9c3, Restore),
        (0x90d4c874, Randomize),
        (0xdc614f2b, ElseIf),
    ]
};

/// Binary-searches the statement keyword table by hash, mirroring
/// `b1_id_get_stmt_by_hash`'s use of `bsearch` over a table sorted by hash.
pub fn lookup_statement_keyword(h: u32) -> Option<StatementKeyword> {
    STATEMENT_KEYWORD_TABLE
        .binary_search_by_key(&h, |&(hash, _)| hash)
        .ok()
        .map(|i| STATEMENT_KEYWORD_TABLE[i].1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use b1util::{KeywordFromStr, KeywordName};

    #[test]
    fn hash_is_case_insensitive() {
        assert_eq!(hash32(b"GoTo"), hash32(b"goto"));
        assert_eq!(hash32(b"goto"), hash32(b"GOTO"));
        assert_eq!(hash16(b"GoTo"), hash16(b"goto"));
    }

    #[test]
    fn hash_skips_nul_bytes() {
        assert_eq!(hash32(b"AB"), hash32(b"A\0B"));
    }

    #[test]
    fn hashes_stay_above_reserved_ceiling() {
        for s in ["a", "ab", "x", "i", "go"] {
            assert!(hash32(s.as_bytes()) >= RESERVED_HASH_CEILING);
            assert!((hash16(s.as_bytes()) as u32) >= RESERVED_HASH_CEILING);
        }
    }

    #[test]
    fn statement_keyword_lookup_round_trips() {
        assert_eq!(
            lookup_statement_keyword(hash32(b"GOTO")),
            Some(StatementKeyword::Goto)
        );
        assert_eq!(lookup_statement_keyword(hash32(b"FOOBAR")), None);
    }

    #[test]
    fn keyword_name_round_trips_through_hash_table() {
        for &(h, kw) in STATEMENT_KEYWORD_TABLE {
            let spelling = kw.keyword_name();
            assert_eq!(hash32(spelling.as_bytes()), h, "{spelling} hashes to a different slot than its table entry");
            assert_eq!(lookup_statement_keyword(h), Some(kw));
            assert_eq!(StatementKeyword::from_keyword(spelling), Ok(kw));
        }
    }
}
