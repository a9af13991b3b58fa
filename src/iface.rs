//! External interfaces (spec §6): capabilities bundled into one interpreter
//! context instead of being threaded through every call individually
//! (design notes, "Replacing module-level mutables").

use crate::errors::Error;

/// Which line to fetch next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRequest {
    First,
    Next,
    ByNumber(u32),
}

/// A statement kind tag recorded by the prepass against a line number, used
/// by [`ProgramLineProvider::cache_current_line_num`] to build the FOR/NEXT,
/// WHILE/WEND and DATA indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedStmtKind {
    For,
    Next,
    While,
    Wend,
    Data,
    Other,
}

/// Supplies program line text and the indices the prepass builds over it.
/// The default implementation lives in `b1fmt`.
pub trait ProgramLineProvider {
    /// Sets the current line and returns its 1-based line number.
    fn get_line(&mut self, kind: LineRequest) -> Result<(u32, Vec<u8>), Error>;

    /// Called once per line during the prepass.
    fn cache_current_line_num(&mut self, line_num: u32, kind: CachedStmtKind) -> Result<(), Error>;

    /// Jumps to the line after the `NEXT` matching the current `FOR`.
    fn for_go_next(&mut self) -> Result<u32, Error>;

    /// Jumps to the line after the `WEND` matching the current `WHILE`.
    fn while_go_wend(&mut self) -> Result<u32, Error>;

    /// Advances the DATA cursor: either to the first field at/after
    /// `line`, or (when `line` is `None`) to the next field after the last
    /// one read.
    fn data_go_next(&mut self, line: Option<u32>) -> Result<(u32, usize), Error>;
}

/// Four character-oriented operations; everything PRINT/INPUT does is built
/// from these.
pub trait IoPort {
    fn put_char(&mut self, c: u8) -> Result<(), Error>;
    fn put_newline(&mut self) -> Result<(), Error>;
    /// A newline inserted because PRINT output crossed the configured
    /// margin, as opposed to one the program asked for explicitly.
    fn put_margin_newline(&mut self) -> Result<(), Error>;
    /// Returns `None` at end of stream.
    fn get_char(&mut self) -> Result<Option<u8>, Error>;
}

/// `RND`/`RANDOMIZE` support.
pub trait RandomSource {
    fn randomize(&mut self, seed: Option<i32>);
    /// Returns the next pseudo-random integer in `[0, max]`.
    fn next_seed(&mut self, max: i32) -> i32;
}

/// Locale-aware case folding and comparison, falling back to the ASCII
/// rules in `b1util` when no locale is configured.
pub trait LocaleCompare {
    fn to_upper(&self, b: u8) -> u8;
    fn to_lower(&self, b: u8) -> u8;
    fn strcmp_ignore_case(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering;
}

/// Default ASCII-only locale, used when no host locale is wired in.
pub struct AsciiLocale;

impl LocaleCompare for AsciiLocale {
    fn to_upper(&self, b: u8) -> u8 {
        b1util::to_upper(b)
    }

    fn to_lower(&self, b: u8) -> u8 {
        b1util::to_lower(b)
    }

    fn strcmp_ignore_case(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
        let la: Vec<u8> = a.iter().map(|&c| b1util::to_lower(c)).collect();
        let lb: Vec<u8> = b.iter().map(|&c| b1util::to_lower(c)).collect();
        la.cmp(&lb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_locale_folds_case() {
        let locale = AsciiLocale;
        assert_eq!(locale.to_upper(b'a'), b'A');
        assert_eq!(locale.to_lower(b'Z'), b'z');
    }

    #[test]
    fn ascii_locale_compares_ignoring_case() {
        let locale = AsciiLocale;
        assert_eq!(locale.strcmp_ignore_case(b"GoTo", b"goto"), std::cmp::Ordering::Equal);
        assert_eq!(locale.strcmp_ignore_case(b"abc", b"abd"), std::cmp::Ordering::Less);
    }
}
