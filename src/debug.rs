//! Breakpoint bookkeeping: a bounded, sorted line-number table (spec §6,
//! `EMANYBRKPNT`). No debugging UI or step/continue loop lives here; that
//! surface is a Non-goal. This just gives the interpreter a place to record
//! which lines are flagged and to answer "is this line one of them".

use crate::errors::{Error, ErrorKind};

/// Matches the original core's fixed breakpoint table size.
pub const MAX_BREAKPOINTS: usize = 32;

#[derive(Default)]
pub struct Breakpoints {
    lines: Vec<u32>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Breakpoints::default()
    }

    pub fn is_set(&self, line: u32) -> bool {
        self.lines.binary_search(&line).is_ok()
    }

    /// Inserts `line` in sorted order; a line already present is a no-op.
    pub fn add(&mut self, line: u32) -> Result<(), Error> {
        match self.lines.binary_search(&line) {
            Ok(_) => Ok(()),
            Err(pos) => {
                if self.lines.len() >= MAX_BREAKPOINTS {
                    return Err(ErrorKind::TooManyBreakpoints.into());
                }
                self.lines.insert(pos, line);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, line: u32) {
        if let Ok(pos) = self.lines.binary_search(&line) {
            self.lines.remove(pos);
        }
    }

    pub fn remove_all(&mut self) {
        self.lines.clear();
    }

    pub fn list(&self) -> &[u32] {
        &self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_keeps_sorted_order() {
        let mut bp = Breakpoints::new();
        bp.add(30).unwrap();
        bp.add(10).unwrap();
        bp.add(20).unwrap();
        assert_eq!(bp.list(), &[10, 20, 30]);
    }

    #[test]
    fn add_same_line_twice_is_a_no_op() {
        let mut bp = Breakpoints::new();
        bp.add(10).unwrap();
        bp.add(10).unwrap();
        assert_eq!(bp.list(), &[10]);
    }

    #[test]
    fn exceeding_capacity_errors() {
        let mut bp = Breakpoints::new();
        for line in 0..MAX_BREAKPOINTS as u32 {
            bp.add(line).unwrap();
        }
        let err = bp.add(MAX_BREAKPOINTS as u32).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TooManyBreakpoints);
    }

    #[test]
    fn remove_drops_the_line() {
        let mut bp = Breakpoints::new();
        bp.add(5).unwrap();
        bp.remove(5);
        assert!(!bp.is_set(5));
    }
}
