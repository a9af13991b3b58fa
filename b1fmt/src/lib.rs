//! Line-numbered BASIC program text loader (spec §6, "Program-line
//! provider" / "On-disk program format"). Parses plain text — one
//! statement per line, optional leading line number 1..65530 — into an
//! indexed [`Program`], the default [`ProgramLineProvider`].

use std::fs;
use std::io;
use std::path::Path;

use b1core::{CachedStmtKind, Error, ErrorKind, LineRequest, ProgramLineProvider};

const MAX_LINE_NUMBER: u32 = 65530;

/// A parsed program: line numbers and their statement text, plus the
/// FOR/NEXT, WHILE/WEND and DATA indices built by the prepass.
#[derive(Debug)]
pub struct Program {
    lines: Vec<(u32, Vec<u8>)>,
    current: usize,
    for_next: std::collections::HashMap<u32, usize>,
    for_open: Vec<u32>,
    while_wend: std::collections::HashMap<u32, usize>,
    while_open: Vec<u32>,
    data_lines: Vec<u32>,
    data_pos: Option<(usize, usize)>,
}

impl Program {
    /// Parses `src` into line-number/text pairs. Blank lines and bare
    /// comments are kept (a line with no leading number still executes,
    /// it's just unreachable by GOTO/GOSUB); line numbers must be strictly
    /// ascending, matching the on-disk format's ordering requirement.
    pub fn parse(src: &str) -> Result<Program, Error> {
        let mut lines = Vec::new();
        let mut last_num = 0u32;

        for raw in src.split('\n') {
            let raw = raw.strip_suffix('\r').unwrap_or(raw);
            let bytes = raw.as_bytes();
            let mut i = 0;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i == 0 {
                continue;
            }
            let num: u32 = std::str::from_utf8(&bytes[..i])
                .unwrap()
                .parse()
                .map_err(|_| ErrorKind::InvalidLineNumber)?;
            if num == 0 || num > MAX_LINE_NUMBER || num <= last_num {
                return Err(ErrorKind::InvalidLineNumber.into());
            }
            last_num = num;

            let text_start = i + bytes[i..].iter().take_while(|&&b| b == b' ' || b == b'\t').count();
            lines.push((num, bytes[text_start..].to_vec()));
        }

        if lines.is_empty() {
            return Err(ErrorKind::InvalidLineNumber.into());
        }

        Ok(Program {
            lines,
            current: 0,
            for_next: std::collections::HashMap::new(),
            for_open: Vec::new(),
            while_wend: std::collections::HashMap::new(),
            while_open: Vec::new(),
            data_lines: Vec::new(),
            data_pos: None,
        })
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<Program> {
        let src = fs::read_to_string(path)?;
        Program::parse(&src).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn index_of(&self, line_num: u32) -> Option<usize> {
        self.lines.binary_search_by_key(&line_num, |&(n, _)| n).ok()
    }

    fn line_at(&self, idx: usize) -> (u32, Vec<u8>) {
        let (n, t) = &self.lines[idx];
        (*n, t.clone())
    }

    /// Byte offsets of each comma-separated `DATA` field, quote-aware.
    fn data_field_offsets(&self, text: &[u8]) -> Vec<usize> {
        let mut start = 0;
        while start < text.len() && (text[start] as char).is_whitespace() {
            start += 1;
        }
        start += 4; // "DATA"
        let mut offsets = Vec::new();
        let mut pos = start;
        let mut in_string = false;
        let mut field_start = start;
        while pos <= text.len() {
            let at_end = pos == text.len();
            let c = if at_end { 0 } else { text[pos] };
            if !at_end && c == b'"' {
                in_string = !in_string;
            } else if (at_end || c == b',') && !in_string {
                offsets.push(field_start);
                field_start = pos + 1;
                if at_end {
                    break;
                }
            }
            pos += 1;
        }
        offsets
    }
}

impl ProgramLineProvider for Program {
    fn get_line(&mut self, kind: LineRequest) -> Result<(u32, Vec<u8>), Error> {
        match kind {
            LineRequest::First => {
                self.current = 0;
                Ok(self.line_at(0))
            }
            LineRequest::Next => {
                if self.current + 1 >= self.lines.len() {
                    return Err(ErrorKind::Eof.into());
                }
                self.current += 1;
                Ok(self.line_at(self.current))
            }
            LineRequest::ByNumber(n) => {
                let idx = self.index_of(n).ok_or(ErrorKind::LineNumberNotFound)?;
                self.current = idx;
                Ok(self.line_at(idx))
            }
        }
    }

    fn cache_current_line_num(&mut self, line_num: u32, kind: CachedStmtKind) -> Result<(), Error> {
        match kind {
            CachedStmtKind::For => self.for_open.push(line_num),
            CachedStmtKind::Next => {
                let open = self.for_open.pop().ok_or(ErrorKind::NextWithoutFor)?;
                let idx = self.index_of(line_num).ok_or(ErrorKind::LineNumberNotFound)?;
                self.for_next.insert(open, idx + 1);
            }
            CachedStmtKind::While => self.while_open.push(line_num),
            CachedStmtKind::Wend => {
                let open = self.while_open.pop().ok_or(ErrorKind::WendWithoutWhile)?;
                let idx = self.index_of(line_num).ok_or(ErrorKind::LineNumberNotFound)?;
                self.while_wend.insert(open, idx + 1);
            }
            CachedStmtKind::Data => self.data_lines.push(line_num),
            CachedStmtKind::Other => {}
        }
        Ok(())
    }

    fn for_go_next(&mut self) -> Result<u32, Error> {
        let (line_num, _) = self.line_at(self.current);
        let idx = *self.for_next.get(&line_num).ok_or(ErrorKind::ForWithoutNext)?;
        self.lines.get(idx).map(|&(n, _)| n).ok_or(ErrorKind::ProgramUnended.into())
    }

    fn while_go_wend(&mut self) -> Result<u32, Error> {
        let (line_num, _) = self.line_at(self.current);
        let idx = *self.while_wend.get(&line_num).ok_or(ErrorKind::WhileWithoutWend)?;
        self.lines.get(idx).map(|&(n, _)| n).ok_or(ErrorKind::ProgramUnended.into())
    }

    fn data_go_next(&mut self, line: Option<u32>) -> Result<(u32, usize), Error> {
        let (line_pos, field_idx) = match line {
            Some(target) => {
                let line_pos = if target == 0 {
                    0
                } else {
                    self.data_lines.partition_point(|&n| n < target)
                };
                if line_pos >= self.data_lines.len() {
                    return Err(ErrorKind::DataEnd.into());
                }
                (line_pos, 0)
            }
            None => {
                let (line_pos, field_idx) = self.data_pos.ok_or(ErrorKind::DataEnd)?;
                let cur_line = self.data_lines[line_pos];
                let (_, text) = self.line_at(self.index_of(cur_line).unwrap());
                let fields = self.data_field_offsets(&text);
                if field_idx + 1 < fields.len() {
                    (line_pos, field_idx + 1)
                } else if line_pos + 1 < self.data_lines.len() {
                    (line_pos + 1, 0)
                } else {
                    return Err(ErrorKind::DataEnd.into());
                }
            }
        };

        let data_line = self.data_lines[line_pos];
        let (_, text) = self.line_at(self.index_of(data_line).unwrap());
        let fields = self.data_field_offsets(&text);
        let offset = fields[field_idx];
        self.data_pos = Some((line_pos, field_idx));
        Ok((data_line, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_ascending_lines() {
        let p = Program::parse("10 PRINT 1\n20 PRINT 2\n").unwrap();
        assert_eq!(p.lines.len(), 2);
        assert_eq!(p.lines[0].0, 10);
        assert_eq!(p.lines[1].0, 20);
    }

    #[test]
    fn parse_rejects_non_ascending_lines() {
        let err = Program::parse("20 PRINT 1\n10 PRINT 2\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidLineNumber);
    }

    #[test]
    fn get_line_first_and_next_walk_in_order() {
        let mut p = Program::parse("10 PRINT 1\n20 PRINT 2\n30 END\n").unwrap();
        let (n, _) = p.get_line(LineRequest::First).unwrap();
        assert_eq!(n, 10);
        let (n, _) = p.get_line(LineRequest::Next).unwrap();
        assert_eq!(n, 20);
    }

    #[test]
    fn get_line_by_number_finds_target() {
        let mut p = Program::parse("10 PRINT 1\n20 PRINT 2\n").unwrap();
        let (n, t) = p.get_line(LineRequest::ByNumber(20)).unwrap();
        assert_eq!(n, 20);
        assert_eq!(t, b"PRINT 2");
    }

    #[test]
    fn data_field_offsets_respect_quoted_commas() {
        let p = Program::parse("10 DATA 1, \"a,b\", 3\n").unwrap();
        let offsets = p.data_field_offsets(b"DATA 1, \"a,b\", 3");
        assert_eq!(offsets.len(), 3);
    }
}
