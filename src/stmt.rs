//! Statement interpreter: prepass plus the main statement loop, the
//! control-flow stack, and per-statement handlers (spec §4.5, §4.7).

use std::collections::HashMap;

use crate::debug::Breakpoints;
use crate::errors::{Error, ErrorKind, Signal};
use crate::eval::{EvalContext, Evaluator, UserFunction, UserFunctionTable};
use crate::features::Features;
use crate::hash::{self, StatementKeyword};
use crate::iface::{CachedStmtKind, IoPort, LineRequest, ProgramLineProvider, RandomSource};
use crate::memory::{BlockId, MemoryManager};
use crate::rpn;
use crate::token::{next_token, skip_spaces};
use crate::types::{StringPayload, TypeTag, Value};
use crate::vars::{CreateOutcome, VarSlot, VariableStore};

/// One entry in the bounded control-flow stack (spec §4.5). `IF` is not a
/// stack entry: its EXEC/NEXT/SKIP state only lives for the remainder of
/// the line it's on, tracked locally by [`Interpreter::exec_line`].
#[derive(Debug, Clone)]
pub enum Frame {
    Gosub { return_line: u32 },
    For {
        var_hash: u32,
        limit: f64,
        step: f64,
        /// Line right after the `FOR` header, where `NEXT` jumps back to
        /// when the loop continues.
        body_line: u32,
        /// The line the matching `NEXT` itself sits on, the `CONTINUE`
        /// target (falls through to the increment-and-test).
        next_stmt_line: u32,
        /// Line right after the matching `NEXT`, where the loop jumps on
        /// termination or `BREAK`.
        next_line: u32,
    },
    /// `wend_line` is the line *after* the matching `WEND`, per
    /// `ProgramLineProvider::while_go_wend`; both the false-condition exit
    /// and `BREAK` land there.
    While { while_line: u32, wend_line: u32 },
}

/// `IF`'s per-line state machine (spec §4.5): `EXEC` while the active arm's
/// statements should run, `NEXT` while waiting for an `ELSEIF`/`ELSE` to
/// pick an arm, `SKIP` once an arm has already run for the rest of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IfState {
    Exec,
    Next,
    Skip,
}

/// What happened after executing one line: fall through to the next program
/// line, a control transfer landed on a specific line, or the program ended.
enum LineOutcome {
    Fallthrough,
    Jumped(u32, Vec<u8>),
    Signal(Signal),
}

/// Whether a statement handler performed a control transfer (and to where)
/// or execution should simply continue with the next clause on the line.
enum Flow {
    Continue,
    Jump(u32, Vec<u8>),
}

/// Result of dispatching one clause: either a `Flow` decision, or one of the
/// two statements (`END`/`STOP`) that unwind the whole run instead.
enum ClauseOutcome {
    Flow(Flow),
    Signal(Signal),
}

pub const MAX_STACK_DEPTH: usize = 64;

/// Runtime policy flags set by `OPTION`/`SET`, live for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub array_base: u8,
    pub explicit: bool,
    pub margin: u16,
    pub zone_width: u16,
    pub input_echo: bool,
    /// Whether any executable statement has run yet; `OPTION` may only
    /// change `array_base`/`explicit` while this is still `false`.
    pub started: bool,
}

impl RunOptions {
    fn new(features: &Features) -> Self {
        RunOptions {
            array_base: features.default_array_base,
            explicit: false,
            margin: features.margin,
            zone_width: features.zone_width,
            input_echo: true,
            started: false,
        }
    }
}

/// Everything the prepass discovers before execution starts.
#[derive(Default)]
pub struct PrepassIndex {
    pub for_next: HashMap<u32, u32>,
    pub while_wend: HashMap<u32, u32>,
    pub data_lines: Vec<u32>,
    /// Maps a line number to the line that physically follows it in program
    /// order, so `NEXT` can jump back to a `FOR` header's loop body without
    /// re-running the header itself.
    pub line_after: HashMap<u32, u32>,
}

pub struct Interpreter<'a> {
    pub vars: VariableStore,
    pub mm: MemoryManager,
    pub features: Features,
    pub options: RunOptions,
    pub user_fns: UserFunctionTable,
    pub stack: Vec<Frame>,
    pub provider: &'a mut dyn ProgramLineProvider,
    pub io: &'a mut dyn IoPort,
    pub rng: &'a mut dyn RandomSource,
    pub print_col: u16,
    pub data_cursor: Option<(u32, usize)>,
    /// Lines flagged for a host debugger; not consulted by `run()` itself
    /// (no step/continue loop lives here, per Non-goals). A host can poll
    /// `is_breakpoint` between lines of its own driving loop.
    pub breakpoints: Breakpoints,
    prepass: PrepassIndex,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        features: Features,
        provider: &'a mut dyn ProgramLineProvider,
        io: &'a mut dyn IoPort,
        rng: &'a mut dyn RandomSource,
    ) -> Self {
        Interpreter {
            vars: VariableStore::new(),
            mm: MemoryManager::new(),
            options: RunOptions::new(&features),
            features,
            user_fns: UserFunctionTable::new(),
            stack: Vec::new(),
            provider,
            io,
            rng,
            print_col: 0,
            data_cursor: None,
            breakpoints: Breakpoints::new(),
            prepass: PrepassIndex::default(),
        }
    }

    pub fn is_breakpoint(&self, line: u32) -> bool {
        self.breakpoints.is_set(line)
    }

    /// Single linear scan building the line-number index (via the
    /// provider), FOR/NEXT and WHILE/WEND pairing, the DATA index, and DEF
    /// registration (spec §4.7).
    pub fn prepass(&mut self) -> Result<(), Error> {
        let mut for_stack: Vec<u32> = Vec::new();
        let mut while_stack: Vec<u32> = Vec::new();
        let mut prev_line: Option<u32> = None;

        let (mut line_num, mut text) = self.provider.get_line(LineRequest::First)?;
        loop {
            if let Some(p) = prev_line {
                self.prepass.line_after.insert(p, line_num);
            }
            prev_line = Some(line_num);

            let kw = first_keyword(&text, &self.features);
            let cached_kind = match kw {
                Some(StatementKeyword::For) => CachedStmtKind::For,
                Some(StatementKeyword::Next) => CachedStmtKind::Next,
                Some(StatementKeyword::While) => CachedStmtKind::While,
                Some(StatementKeyword::Wend) => CachedStmtKind::Wend,
                Some(StatementKeyword::Data) => CachedStmtKind::Data,
                _ => CachedStmtKind::Other,
            };
            self.provider.cache_current_line_num(line_num, cached_kind)?;

            match kw {
                Some(StatementKeyword::For) => for_stack.push(line_num),
                Some(StatementKeyword::Next) => {
                    let open = for_stack.pop().ok_or(ErrorKind::NextWithoutFor)?;
                    self.prepass.for_next.insert(open, line_num);
                }
                Some(StatementKeyword::While) => while_stack.push(line_num),
                Some(StatementKeyword::Wend) => {
                    let open = while_stack.pop().ok_or(ErrorKind::WendWithoutWhile)?;
                    self.prepass.while_wend.insert(open, line_num);
                }
                Some(StatementKeyword::Data) => self.prepass.data_lines.push(line_num),
                Some(StatementKeyword::Def) => self.register_def(&text)?,
                _ => {}
            }

            match self.provider.get_line(LineRequest::Next) {
                Ok((n, t)) => {
                    line_num = n;
                    text = t;
                }
                Err(e) if e.kind == ErrorKind::Eof => break,
                Err(e) => return Err(e),
            }
        }

        if !for_stack.is_empty() {
            return Err(ErrorKind::ForWithoutNext.into());
        }
        if !while_stack.is_empty() {
            return Err(ErrorKind::WhileWithoutWend.into());
        }
        Ok(())
    }

    fn register_def(&mut self, text: &[u8]) -> Result<(), Error> {
        // DEF FNNAME(param, ...) = expr
        let after_def = skip_keyword(text, &self.features)?;
        let (name_tok, mut pos) = next_token(text, after_def, &self.features, false)?;
        let name_hash = hash::hash(name_tok.text(text), self.features.hash32);
        if self.user_fns.functions.contains_key(&name_hash) {
            return Err(ErrorKind::IdentifierInUse.into());
        }

        let mut params = Vec::new();
        pos = skip_spaces(text, pos);
        if pos < text.len() && text[pos] == b'(' {
            pos += 1;
            loop {
                pos = skip_spaces(text, pos);
                if pos < text.len() && text[pos] == b')' {
                    pos += 1;
                    break;
                }
                let (tok, next) = next_token(text, pos, &self.features, false)?;
                params.push(hash::hash(tok.text(text), self.features.hash32));
                pos = skip_spaces(text, next);
                if pos < text.len() && text[pos] == b',' {
                    pos += 1;
                    continue;
                }
                if pos < text.len() && text[pos] == b')' {
                    pos += 1;
                    break;
                }
                return Err(ErrorKind::MissingBracket.into());
            }
        }

        pos = skip_spaces(text, pos);
        if pos >= text.len() || text[pos] != b'=' {
            return Err(ErrorKind::Syntax.into());
        }
        pos += 1;

        let (body, _) = rpn::build(text, pos, &self.features, &[])?;
        let return_type = if name_tok.text(text).ends_with(b"$") {
            TypeTag::Str
        } else {
            self.features.high_precision_float()
        };

        self.user_fns.functions.insert(
            name_hash,
            UserFunction {
                params,
                body,
                body_line: text.to_vec(),
                return_type,
            },
        );
        Ok(())
    }

    /// Runs the program to completion, returning the terminating signal.
    pub fn run(&mut self) -> Result<Signal, Error> {
        self.prepass()?;
        let (mut line_num, mut text) = self.provider.get_line(LineRequest::First)?;
        loop {
            match self.exec_line(line_num, &text)? {
                LineOutcome::Signal(Signal::End) => return Ok(Signal::End),
                LineOutcome::Signal(Signal::Stop) => return Ok(Signal::Stop),
                LineOutcome::Jumped(n, t) => {
                    line_num = n;
                    text = t;
                    continue;
                }
                LineOutcome::Fallthrough => {}
            }
            match self.provider.get_line(LineRequest::Next) {
                Ok((n, t)) => {
                    line_num = n;
                    text = t;
                }
                Err(e) if e.kind == ErrorKind::Eof => return Err(ErrorKind::ProgramUnended.into()),
                Err(e) => return Err(e.with_line(line_num)),
            }
        }
    }

    fn exec_line(&mut self, line_num: u32, text: &[u8]) -> Result<LineOutcome, Error> {
        self.exec_clauses(line_num, text).map_err(|e| e.with_line(line_num))
    }

    /// Walks the `:`-separated clauses of one program line, threading the
    /// per-line `IF` state machine through them (spec §4.5). Stops and
    /// reports a jump the instant a statement performs one, so a stale
    /// clause from the line that's being left behind is never executed.
    fn exec_clauses(&mut self, line_num: u32, text: &[u8]) -> Result<LineOutcome, Error> {
        let mut offset = 0usize;
        let mut if_state: Option<IfState> = None;

        loop {
            let start = skip_spaces(text, offset);
            if start >= text.len() || text[start] == b'\'' {
                return Ok(LineOutcome::Fallthrough);
            }

            let kw_end = skip_keyword_opt(text, start, &self.features);
            let hash_val = hash::hash(&text[start..kw_end], self.features.hash32);
            let keyword = hash::lookup_statement_keyword(hash_val);
            let clause_end = find_clause_end(text, start);

            if let Some(StatementKeyword::ElseIf) = keyword {
                match if_state {
                    Some(IfState::Next) => {
                        let (cond, then_after) = self.parse_if_condition(text, kw_end)?;
                        if cond {
                            if_state = Some(IfState::Exec);
                            offset = then_after;
                            continue;
                        }
                        if_state = Some(IfState::Next);
                        offset = skip_past_clause(text, clause_end);
                        continue;
                    }
                    Some(_) => {
                        if_state = Some(IfState::Skip);
                        offset = skip_past_clause(text, clause_end);
                        continue;
                    }
                    None => return Err(ErrorKind::ElseWithoutIf.into()),
                }
            }

            if let Some(StatementKeyword::Else) = keyword {
                match if_state {
                    Some(IfState::Next) => {
                        if_state = Some(IfState::Exec);
                        offset = skip_spaces(text, kw_end);
                        continue;
                    }
                    Some(_) => {
                        if_state = Some(IfState::Skip);
                        offset = skip_past_clause(text, clause_end);
                        continue;
                    }
                    None => return Err(ErrorKind::ElseWithoutIf.into()),
                }
            }

            if matches!(if_state, Some(IfState::Next) | Some(IfState::Skip)) {
                offset = skip_past_clause(text, clause_end);
                continue;
            }

            if let Some(StatementKeyword::If) = keyword {
                if if_state.is_some() {
                    return Err(ErrorKind::NestedIf.into());
                }
                let (cond, then_after) = self.parse_if_condition(text, kw_end)?;
                if_state = Some(if cond { IfState::Exec } else { IfState::Next });
                offset = then_after;
                continue;
            }

            let outcome = self.dispatch_clause(line_num, text, start, kw_end, keyword)?;
            if if_state == Some(IfState::Exec) {
                if_state = Some(IfState::Skip);
            }

            match outcome {
                ClauseOutcome::Signal(s) => return Ok(LineOutcome::Signal(s)),
                ClauseOutcome::Flow(Flow::Jump(n, t)) => return Ok(LineOutcome::Jumped(n, t)),
                ClauseOutcome::Flow(Flow::Continue) => {
                    self.options.started = true;
                    offset = skip_past_clause(text, clause_end);
                }
            }
        }
    }

    /// Parses `<condition> THEN`, returning the condition's truth value and
    /// the offset right after `THEN` (where an inline statement or a bare
    /// line-number target follows). Used by both `IF` and `ELSEIF`.
    fn parse_if_condition(&mut self, text: &[u8], offset: usize) -> Result<(bool, usize), Error> {
        let (cond, next) = self.eval(text, offset, &[b"THEN"])?;
        let then_pos = skip_spaces(text, next);
        if then_pos + 4 > text.len() || !text[then_pos..then_pos + 4].eq_ignore_ascii_case(b"THEN") {
            return Err(ErrorKind::Syntax.into());
        }
        Ok((cond.as_i32()? != 0, skip_spaces(text, then_pos + 4)))
    }

    /// Dispatches one statement clause. `THEN <line-number>` is rewritten
    /// into the dispatch table's `GOTO` handling right here, since both are
    /// equivalent to `: GOTO <line-number>`.
    fn dispatch_clause(
        &mut self,
        line_num: u32,
        text: &[u8],
        start: usize,
        kw_end: usize,
        keyword: Option<StatementKeyword>,
    ) -> Result<ClauseOutcome, Error> {
        use ClauseOutcome::Flow as F;
        Ok(match keyword {
            Some(StatementKeyword::Let) => {
                self.stmt_let(text, kw_end)?;
                F(Flow::Continue)
            }
            Some(StatementKeyword::Print) => {
                self.stmt_print(text, kw_end)?;
                F(Flow::Continue)
            }
            Some(StatementKeyword::For) => F(self.stmt_for(line_num, text, kw_end)?),
            Some(StatementKeyword::Next) => F(self.stmt_next(text, kw_end)?),
            Some(StatementKeyword::While) => F(self.stmt_while(line_num, text, kw_end)?),
            Some(StatementKeyword::Wend) => F(self.stmt_wend()?),
            Some(StatementKeyword::Goto) => F(self.stmt_goto(text, kw_end)?),
            Some(StatementKeyword::Gosub) => F(self.stmt_gosub(line_num, text, kw_end)?),
            Some(StatementKeyword::Return) => F(self.stmt_return()?),
            Some(StatementKeyword::On) => F(self.stmt_on(line_num, text, kw_end)?),
            Some(StatementKeyword::Dim) => {
                self.stmt_dim(text, kw_end)?;
                F(Flow::Continue)
            }
            Some(StatementKeyword::Erase) => {
                self.stmt_erase(text, kw_end)?;
                F(Flow::Continue)
            }
            Some(StatementKeyword::Read) => {
                self.stmt_read(text, kw_end)?;
                F(Flow::Continue)
            }
            Some(StatementKeyword::Restore) => {
                self.stmt_restore(text, kw_end)?;
                F(Flow::Continue)
            }
            Some(StatementKeyword::Break) => F(self.stmt_break()?),
            Some(StatementKeyword::Continue) => F(self.stmt_continue()?),
            Some(StatementKeyword::Option) => {
                self.stmt_option(text, kw_end)?;
                F(Flow::Continue)
            }
            Some(StatementKeyword::Set) => {
                self.stmt_set(text, kw_end)?;
                F(Flow::Continue)
            }
            Some(StatementKeyword::Def) | Some(StatementKeyword::Rem) | Some(StatementKeyword::Data) => {
                F(Flow::Continue)
            }
            Some(StatementKeyword::End) => ClauseOutcome::Signal(Signal::End),
            Some(StatementKeyword::Stop) => ClauseOutcome::Signal(Signal::Stop),
            Some(StatementKeyword::Input) => {
                self.stmt_input(text, kw_end)?;
                F(Flow::Continue)
            }
            Some(StatementKeyword::Randomize) => {
                self.stmt_randomize(text, kw_end)?;
                F(Flow::Continue)
            }
            Some(StatementKeyword::If) | Some(StatementKeyword::ElseIf) | Some(StatementKeyword::Else) => {
                unreachable!("handled by the caller's IF state machine")
            }
            None => {
                // No recognized keyword, or a bare line number after `THEN`:
                // treat a leading digit as `GOTO`, otherwise implicit LET.
                if start < text.len() && text[start].is_ascii_digit() {
                    F(self.stmt_goto(text, start)?)
                } else {
                    self.stmt_let(text, start)?;
                    F(Flow::Continue)
                }
            }
        })
    }

    fn eval(&mut self, text: &[u8], offset: usize, stop: &[&[u8]]) -> Result<(Value, usize), Error> {
        let (records, next) = rpn::build(text, offset, &self.features, stop)?;
        let mut evaluator = Evaluator::new();
        let mut ctx = EvalContext {
            vars: &mut self.vars,
            mm: &mut self.mm,
            features: &self.features,
            rng: self.rng,
            user_fns: &self.user_fns,
        };
        let v = evaluator.evaluate(&records, text, &mut ctx)?;
        Ok((v, next))
    }

    fn stmt_let(&mut self, text: &[u8], offset: usize) -> Result<(), Error> {
        let start = skip_spaces(text, offset);
        let (name_tok, after_name) = next_token(text, start, &self.features, false)?;
        let name = name_tok.text(text);
        let hash_val = hash::hash(name, self.features.hash32);

        let mut pos = skip_spaces(text, after_name);
        let mut subscripts: Option<Vec<i32>> = None;
        if pos < text.len() && text[pos] == b'(' {
            pos += 1;
            let mut subs = Vec::new();
            loop {
                let (v, next) = self.eval(text, pos, &[b",", b")"])?;
                subs.push(v.as_i32()?);
                pos = skip_spaces(text, next);
                if pos < text.len() && text[pos] == b',' {
                    pos += 1;
                    continue;
                }
                if pos < text.len() && text[pos] == b')' {
                    pos += 1;
                    break;
                }
                return Err(ErrorKind::MissingBracket.into());
            }
            subscripts = Some(subs);
        }

        let eq_pos = skip_spaces(text, pos);
        if eq_pos >= text.len() || text[eq_pos] != b'=' {
            return Err(ErrorKind::Syntax.into());
        }

        if let Some(subs) = subscripts {
            let (value, _) = self.eval(text, eq_pos + 1, &[b":"])?;
            return self.set_array_element(hash_val, &subs, value);
        }

        if self.vars.get(hash_val).is_none() {
            if self.options.explicit {
                return Err(ErrorKind::UnknownIdentifier.into());
            }
            self.vars.create_scalar(hash_val, &String::from_utf8_lossy(name));
        }

        let (value, _) = self.eval(text, eq_pos + 1, &[b":"])?;
        self.vars.set_scalar(hash_val, value, &mut self.mm)
    }

    /// Writes `value` into an existing array's element at `subs`, the LET
    /// counterpart to `dispatch_call`'s array-subscript read in `eval.rs`.
    fn set_array_element(&mut self, hash_val: u32, subs: &[i32], value: Value) -> Result<(), Error> {
        let var = self.vars.get_mut(hash_val).ok_or(ErrorKind::UnknownIdentifier)?;
        let VarSlot::Array(arr) = &mut var.slot else {
            return Err(ErrorKind::TypeMismatch.into());
        };
        let offset = arr.linear_offset(subs)?;
        let elem_type = arr.element_type;
        let id = arr.ensure_allocated(&mut self.mm)?;
        match elem_type {
            TypeTag::F64 => self.mm.write_f64(id, offset * 8, value.as_f64()?),
            TypeTag::Str => self.set_array_string_element(id, offset, value),
            _ => self.mm.write_u32(id, offset * 4, value.as_i32()? as u32),
        }
    }

    /// Frees the element's current out-of-line block (if any), then
    /// allocates a fresh one holding `value`'s text (spec §6: "writing a
    /// new string frees the old block first").
    fn set_array_string_element(&mut self, id: BlockId, offset: usize, value: Value) -> Result<(), Error> {
        let Value::Str(s) = value else {
            return Err(ErrorKind::TypeMismatch.into());
        };
        let text = self.read_string(&s)?;
        if let Some(old) = self.mm.read_block_ref(id, offset * 8)? {
            self.mm.free(old)?;
        }
        let block = self.mm.store_string(text.as_bytes())?;
        self.mm.write_block_ref(id, offset * 8, Some(block))
    }

    fn stmt_print(&mut self, text: &[u8], offset: usize) -> Result<(), Error> {
        let mut pos = skip_spaces(text, offset);
        let mut trailing_separator = false;
        while pos < text.len() && text[pos] != b':' && text[pos] != b'\'' {
            trailing_separator = false;
            let (value, next) = self.eval(text, pos, &[b",", b";", b":"])?;
            self.print_value(value)?;
            pos = skip_spaces(text, next);
            if pos < text.len() && text[pos] == b',' {
                self.print_zone_advance()?;
                pos += 1;
                trailing_separator = true;
            } else if pos < text.len() && text[pos] == b';' {
                pos += 1;
                trailing_separator = true;
            }
            pos = skip_spaces(text, pos);
        }
        if !trailing_separator {
            self.io.put_newline()?;
            self.print_col = 0;
        }
        Ok(())
    }

    fn print_value(&mut self, v: Value) -> Result<(), Error> {
        match v {
            Value::TabFn(col) => {
                let target = ((col - 1).max(0) as u16) % self.options.margin.max(1);
                if target < self.print_col {
                    self.io.put_margin_newline()?;
                    self.print_col = 0;
                }
                while self.print_col < target {
                    self.io.put_char(b' ')?;
                    self.print_col += 1;
                }
            }
            Value::SpcFn(n) => {
                for _ in 0..n.max(0) {
                    self.emit_char(b' ')?;
                }
            }
            Value::Str(s) => {
                let text = self.read_string(&s)?;
                for b in text.as_bytes() {
                    self.emit_char(*b)?;
                }
            }
            other => {
                let text = format!(" {} ", crate::builtins::call(
                    crate::builtins::BuiltinFn::Str,
                    &[other],
                    &self.features,
                    self.rng,
                    &mut self.mm,
                )?.display_text()?);
                for b in text.as_bytes() {
                    self.emit_char(*b)?;
                }
            }
        }
        Ok(())
    }

    fn emit_char(&mut self, b: u8) -> Result<(), Error> {
        if b == b'\n' {
            self.io.put_newline()?;
            self.print_col = 0;
            return Ok(());
        }
        if self.print_col >= self.options.margin {
            self.io.put_margin_newline()?;
            self.print_col = 0;
        }
        self.io.put_char(b)?;
        self.print_col += 1;
        Ok(())
    }

    fn print_zone_advance(&mut self) -> Result<(), Error> {
        let zw = self.options.zone_width.max(1);
        let next_zone = ((self.print_col / zw) + 1) * zw;
        if next_zone >= self.options.margin {
            self.io.put_margin_newline()?;
            self.print_col = 0;
            return Ok(());
        }
        while self.print_col < next_zone {
            self.io.put_char(b' ')?;
            self.print_col += 1;
        }
        Ok(())
    }

    fn read_string(&self, s: &crate::types::BasicString) -> Result<String, Error> {
        match &s.payload {
            StringPayload::Inline { bytes, len } => {
                Ok(String::from_utf8_lossy(&bytes[..*len as usize]).into_owned())
            }
            StringPayload::Block(id) => {
                let data = self.mm.read(*id)?;
                Ok(String::from_utf8_lossy(data).into_owned())
            }
        }
    }

    fn jump_to(&mut self, target: u32) -> Result<Flow, Error> {
        let (n, t) = self.provider.get_line(LineRequest::ByNumber(target))?;
        Ok(Flow::Jump(n, t))
    }

    fn stmt_for(&mut self, line_num: u32, text: &[u8], offset: usize) -> Result<Flow, Error> {
        let start = skip_spaces(text, offset);
        let (name_tok, after_name) = next_token(text, start, &self.features, false)?;
        let hash_val = hash::hash(name_tok.text(text), self.features.hash32);
        let eq = skip_spaces(text, after_name);
        if eq >= text.len() || text[eq] != b'=' {
            return Err(ErrorKind::Syntax.into());
        }
        let (init, next) = self.eval(text, eq + 1, &[b"TO"])?;
        let to_pos = skip_keyword_literal(text, next, b"TO").ok_or(ErrorKind::Syntax)?;
        let (limit, next2) = self.eval(text, to_pos, &[b"STEP"])?;
        let (step, _next3) = if let Some(step_pos) = skip_keyword_literal(text, next2, b"STEP") {
            self.eval(text, step_pos, &[b":"])?
        } else {
            (Value::I32(1), next2)
        };

        if self.vars.get(hash_val).is_none() {
            self.vars.create_scalar(hash_val, "FOR_VAR");
        }
        self.vars.set_scalar(hash_val, init, &mut self.mm)?;

        let next_stmt_line = *self.prepass.for_next.get(&line_num).ok_or(ErrorKind::ForWithoutNext)?;
        let next_line = self.provider.for_go_next()?;
        let body_line = *self.prepass.line_after.get(&line_num).ok_or(ErrorKind::ForWithoutNext)?;

        if self.stack.len() >= MAX_STACK_DEPTH {
            return Err(ErrorKind::StatementStackOverflow.into());
        }
        self.stack.push(Frame::For {
            var_hash: hash_val,
            limit: limit.as_f64()?,
            step: step.as_f64()?,
            body_line,
            next_stmt_line,
            next_line,
        });

        self.for_termination_check()
    }

    /// Checks the active `FOR`'s loop-termination condition; pops and jumps
    /// past `NEXT` if the control variable is already out of range,
    /// otherwise continues with the line's remaining clauses (spec §4.5,
    /// "entering FOR is immediately followed by a loop-termination test").
    fn for_termination_check(&mut self) -> Result<Flow, Error> {
        let Some(Frame::For { var_hash, limit, step, next_line, .. }) = self.stack.last().cloned() else {
            return Ok(Flow::Continue);
        };
        let v = self.vars.get(var_hash).ok_or(ErrorKind::UnknownIdentifier)?;
        let VarSlot::Scalar(val) = &v.slot else {
            return Err(ErrorKind::ForSubscriptedVar.into());
        };
        let cur = val.as_f64()?;
        let sgn = if step > 0.0 { 1.0 } else if step < 0.0 { -1.0 } else { 0.0 };
        if (cur - limit) * sgn > 0.0 {
            self.stack.pop();
            return self.jump_to(next_line);
        }
        Ok(Flow::Continue)
    }

    fn stmt_next(&mut self, text: &[u8], offset: usize) -> Result<Flow, Error> {
        let start = skip_spaces(text, offset);
        if start < text.len() && text[start] != b':' && text[start] != b'\'' {
            let (tok, _) = next_token(text, start, &self.features, false)?;
            let hash_val = hash::hash(tok.text(text), self.features.hash32);
            match self.stack.last() {
                Some(Frame::For { var_hash, .. }) if *var_hash == hash_val => {}
                Some(Frame::For { .. }) => return Err(ErrorKind::NotVariable.into()),
                _ => return Err(ErrorKind::NextWithoutFor.into()),
            }
        }
        let Some(Frame::For { var_hash, step, body_line, .. }) = self.stack.last().cloned() else {
            return Err(ErrorKind::NextWithoutFor.into());
        };
        let var = self.vars.get(var_hash).ok_or(ErrorKind::UnknownIdentifier)?;
        let VarSlot::Scalar(cur) = var.slot.clone() else {
            return Err(ErrorKind::ForSubscriptedVar.into());
        };
        let new_val = cur.as_f64()? + step;
        let stored = if matches!(cur, Value::F32(_) | Value::F64(_)) {
            Value::F64(new_val)
        } else {
            Value::I32(new_val as i32)
        };
        self.vars.set_scalar(var_hash, stored, &mut self.mm)?;
        match self.for_termination_check()? {
            Flow::Continue => self.jump_to(body_line),
            jumped @ Flow::Jump(..) => Ok(jumped),
        }
    }

    fn stmt_while(&mut self, line_num: u32, text: &[u8], offset: usize) -> Result<Flow, Error> {
        let (cond, _) = self.eval(text, offset, &[b":"])?;
        let wend_line = self.provider.while_go_wend()?;
        if cond.as_i32()? != 0 {
            if self.stack.len() >= MAX_STACK_DEPTH {
                return Err(ErrorKind::StatementStackOverflow.into());
            }
            self.stack.push(Frame::While {
                while_line: line_num,
                wend_line,
            });
            Ok(Flow::Continue)
        } else {
            self.jump_to(wend_line)
        }
    }

    fn stmt_wend(&mut self) -> Result<Flow, Error> {
        match self.stack.pop() {
            Some(Frame::While { while_line, .. }) => self.jump_to(while_line),
            _ => Err(ErrorKind::WendWithoutWhile.into()),
        }
    }

    fn stmt_goto(&mut self, text: &[u8], offset: usize) -> Result<Flow, Error> {
        let start = skip_spaces(text, offset);
        let (tok, _) = next_token(text, start, &self.features, false)?;
        let target: u32 = std::str::from_utf8(tok.text(text))
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(ErrorKind::InvalidLineNumber)?;
        self.jump_to(target)
    }

    fn stmt_gosub(&mut self, line_num: u32, text: &[u8], offset: usize) -> Result<Flow, Error> {
        if self.stack.len() >= MAX_STACK_DEPTH {
            return Err(ErrorKind::StatementStackOverflow.into());
        }
        let return_line = *self.prepass.line_after.get(&line_num).ok_or(ErrorKind::ProgramUnended)?;
        self.stack.push(Frame::Gosub { return_line });
        self.stmt_goto(text, offset)
    }

    fn stmt_return(&mut self) -> Result<Flow, Error> {
        loop {
            match self.stack.pop() {
                Some(Frame::Gosub { return_line }) => return self.jump_to(return_line),
                Some(_) => continue,
                None => return Err(ErrorKind::NoGosub.into()),
            }
        }
    }

    /// `ON <expr> GOTO/GOSUB <line>, <line>, ...`: picks the 1-indexed line
    /// number matching the selector's rounded value. An out-of-range index
    /// is a silent fall-through with no jump, matching classic dialects.
    fn stmt_on(&mut self, line_num: u32, text: &[u8], offset: usize) -> Result<Flow, Error> {
        let (selector, next) = self.eval(text, offset, &[b"GOTO", b"GOSUB"])?;
        let pos = skip_spaces(text, next);
        let is_gosub = if skip_keyword_literal(text, pos, b"GOSUB").is_some() {
            true
        } else if skip_keyword_literal(text, pos, b"GOTO").is_some() {
            false
        } else {
            return Err(ErrorKind::Syntax.into());
        };
        let kw_len = if is_gosub { b"GOSUB".len() } else { b"GOTO".len() };
        let mut pos = skip_spaces(text, pos + kw_len);

        let index = selector.as_i32()?;
        let mut target = None;
        let mut n = 1;
        loop {
            let (tok, after) = next_token(text, pos, &self.features, false)?;
            if n == index {
                target = Some(
                    std::str::from_utf8(tok.text(text))
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or(ErrorKind::InvalidLineNumber)?,
                );
            }
            pos = skip_spaces(text, after);
            if pos < text.len() && text[pos] == b',' {
                pos = skip_spaces(text, pos + 1);
                n += 1;
                continue;
            }
            break;
        }

        let Some(target) = target else {
            return Ok(Flow::Continue);
        };
        if is_gosub {
            if self.stack.len() >= MAX_STACK_DEPTH {
                return Err(ErrorKind::StatementStackOverflow.into());
            }
            let return_line = *self.prepass.line_after.get(&line_num).ok_or(ErrorKind::ProgramUnended)?;
            self.stack.push(Frame::Gosub { return_line });
        }
        self.jump_to(target)
    }

    fn stmt_dim(&mut self, text: &[u8], offset: usize) -> Result<(), Error> {
        let start = skip_spaces(text, offset);
        let (name_tok, after_name) = next_token(text, start, &self.features, false)?;
        let name = name_tok.text(text);
        let hash_val = hash::hash(name, self.features.hash32);

        let mut pos = skip_spaces(text, after_name);
        let mut bounds = Vec::new();
        if pos < text.len() && text[pos] == b'(' {
            pos += 1;
            loop {
                let (lo_or_hi, next) = self.eval(text, pos, &[b"TO", b",", b")"])?;
                pos = skip_spaces(text, next);
                if let Some(to_pos) = skip_keyword_literal(text, pos, b"TO") {
                    let (hi, next2) = self.eval(text, to_pos, &[b",", b")"])?;
                    bounds.push((lo_or_hi.as_i32()?, hi.as_i32()?));
                    pos = skip_spaces(text, next2);
                } else {
                    bounds.push((self.options.array_base as i32, lo_or_hi.as_i32()?));
                }
                if pos < text.len() && text[pos] == b',' {
                    pos += 1;
                    continue;
                }
                if pos < text.len() && text[pos] == b')' {
                    pos += 1;
                    break;
                }
                return Err(ErrorKind::MissingBracket.into());
            }
        }

        if bounds.len() as u8 > self.features.max_array_dims {
            return Err(ErrorKind::WrongSubscriptCount.into());
        }

        let elem_type = if name.ends_with(b"$") {
            TypeTag::Str
        } else {
            self.features.high_precision_float()
        };

        let outcome = self.vars.create_array(hash_val, &String::from_utf8_lossy(name), bounds, elem_type)?;
        if outcome == CreateOutcome::AlreadyExisted {
            return Err(ErrorKind::IdentifierInUse.into());
        }
        Ok(())
    }

    fn stmt_erase(&mut self, text: &[u8], offset: usize) -> Result<(), Error> {
        let start = skip_spaces(text, offset);
        let (tok, _) = next_token(text, start, &self.features, false)?;
        let hash_val = hash::hash(tok.text(text), self.features.hash32);
        self.vars.erase(hash_val, &mut self.mm)
    }

    fn stmt_read(&mut self, text: &[u8], offset: usize) -> Result<(), Error> {
        let mut pos = skip_spaces(text, offset);
        loop {
            let (name_tok, after_name) = next_token(text, pos, &self.features, false)?;
            let hash_val = hash::hash(name_tok.text(text), self.features.hash32);
            let (data_line, data_offset) = match self.data_cursor {
                Some(c) => c,
                None => self.provider.data_go_next(Some(0))?,
            };
            let (_, data_text) = self.provider.get_line(LineRequest::ByNumber(data_line))?;
            let (value, next_offset) = self.eval(&data_text, data_offset, &[b","])?;
            if self.vars.get(hash_val).is_none() {
                self.vars.create_scalar(hash_val, "READ_VAR");
            }
            self.vars.set_scalar(hash_val, value, &mut self.mm)?;
            self.data_cursor = Some(self.provider.data_go_next(None)?);

            pos = skip_spaces(text, after_name.max(next_offset));
            if pos < text.len() && text[pos] == b',' {
                pos += 1;
                continue;
            }
            break;
        }
        Ok(())
    }

    fn stmt_restore(&mut self, text: &[u8], offset: usize) -> Result<(), Error> {
        let start = skip_spaces(text, offset);
        let line = if start < text.len() && text[start].is_ascii_digit() {
            let (tok, _) = next_token(text, start, &self.features, false)?;
            Some(
                std::str::from_utf8(tok.text(text))
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(ErrorKind::InvalidLineNumber)?,
            )
        } else {
            None
        };
        self.data_cursor = Some(self.provider.data_go_next(Some(line.unwrap_or(0)))?);
        Ok(())
    }

    fn stmt_break(&mut self) -> Result<Flow, Error> {
        loop {
            match self.stack.pop() {
                Some(Frame::While { wend_line, .. }) => return self.jump_to(wend_line),
                Some(Frame::For { next_line, .. }) => return self.jump_to(next_line),
                Some(_) => continue,
                None => return Err(ErrorKind::NotInLoop.into()),
            }
        }
    }

    fn stmt_continue(&mut self) -> Result<Flow, Error> {
        match self.stack.last().cloned() {
            Some(Frame::While { while_line, .. }) => self.jump_to(while_line),
            Some(Frame::For { next_stmt_line, .. }) => self.jump_to(next_stmt_line),
            _ => Err(ErrorKind::NotInLoop.into()),
        }
    }

    fn stmt_option(&mut self, text: &[u8], offset: usize) -> Result<(), Error> {
        if self.options.started {
            return Err(ErrorKind::InvalidStatement.into());
        }
        let start = skip_spaces(text, offset);
        let (tok, after) = next_token(text, start, &self.features, false)?;
        let kw = tok.text(text);
        if kw.eq_ignore_ascii_case(b"BASE") {
            let (val, _) = self.eval(text, after, &[b":"])?;
            let base = val.as_i32()?;
            if base != 0 && base != 1 {
                return Err(ErrorKind::InvalidArgument.into());
            }
            self.options.array_base = base as u8;
        } else if kw.eq_ignore_ascii_case(b"EXPLICIT") {
            self.options.explicit = true;
        } else {
            return Err(ErrorKind::InvalidArgument.into());
        }
        Ok(())
    }

    fn stmt_set(&mut self, text: &[u8], offset: usize) -> Result<(), Error> {
        let start = skip_spaces(text, offset);
        let (tok, after) = next_token(text, start, &self.features, false)?;
        let kw = tok.text(text);
        let (val, _) = self.eval(text, after, &[b":"])?;
        if kw.eq_ignore_ascii_case(b"MARGIN") {
            self.options.margin = val.as_i32()?.max(1) as u16;
        } else if kw.eq_ignore_ascii_case(b"ZONEWIDTH") {
            self.options.zone_width = val.as_i32()?.max(1) as u16;
        } else if kw.eq_ignore_ascii_case(b"INPUTECHO") {
            self.options.input_echo = val.as_i32()? != 0;
        } else {
            return Err(ErrorKind::InvalidArgument.into());
        }
        if self.options.zone_width == 0 || self.options.zone_width > self.options.margin {
            return Err(ErrorKind::InvalidArgument.into());
        }
        Ok(())
    }

    fn stmt_randomize(&mut self, text: &[u8], offset: usize) -> Result<(), Error> {
        let start = skip_spaces(text, offset);
        let seed = if start < text.len() && text[start] != b':' {
            let (v, _) = self.eval(text, offset, &[b":"])?;
            Some(v.as_i32()?)
        } else {
            None
        };
        self.rng.randomize(seed);
        Ok(())
    }

    fn stmt_input(&mut self, text: &[u8], offset: usize) -> Result<(), Error> {
        let mut pos = skip_spaces(text, offset);
        if pos < text.len() && text[pos] == b'"' {
            let (tok, next) = next_token(text, pos, &self.features, false)?;
            let prompt = &tok.text(text)[1..tok.len - 1];
            for b in prompt {
                self.io.put_char(*b)?;
            }
            self.io.put_char(b'?')?;
            self.io.put_char(b' ')?;
            pos = skip_spaces(text, next);
            if pos < text.len() && text[pos] == b';' {
                pos += 1;
            }
        }

        let mut names = Vec::new();
        loop {
            let (tok, next) = next_token(text, skip_spaces(text, pos), &self.features, false)?;
            names.push(hash::hash(tok.text(text), self.features.hash32));
            pos = skip_spaces(text, next);
            if pos < text.len() && text[pos] == b',' {
                pos += 1;
                continue;
            }
            break;
        }

        let line_in = self.read_input_line()?;
        let mut field_pos = 0usize;
        for hash_val in names {
            let (value, next) = self.eval(&line_in, field_pos, &[b","])?;
            if self.vars.get(hash_val).is_none() {
                self.vars.create_scalar(hash_val, "INPUT_VAR");
            }
            self.vars.set_scalar(hash_val, value, &mut self.mm)?;
            field_pos = skip_spaces(&line_in, next);
            if field_pos < line_in.len() && line_in[field_pos] == b',' {
                field_pos += 1;
            }
        }
        Ok(())
    }

    fn read_input_line(&mut self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        loop {
            match self.io.get_char()? {
                Some(b'\n') | None => break,
                Some(b'\r') => continue,
                Some(c) => buf.push(c),
            }
        }
        Ok(buf)
    }
}

trait ValueDisplay {
    fn display_text(self) -> Result<String, Error>;
}

impl ValueDisplay for Value {
    fn display_text(self) -> Result<String, Error> {
        match self {
            Value::Str(s) => match s.payload {
                StringPayload::Inline { bytes, len } => {
                    Ok(String::from_utf8_lossy(&bytes[..len as usize]).into_owned())
                }
                StringPayload::Block(_) => Err(ErrorKind::BufferTooSmall.into()),
            },
            _ => Err(ErrorKind::TypeMismatch.into()),
        }
    }
}

fn first_keyword(text: &[u8], features: &Features) -> Option<StatementKeyword> {
    let start = skip_spaces(text, 0);
    if start >= text.len() {
        return None;
    }
    let end = skip_keyword_opt(text, start, features);
    hash::lookup_statement_keyword(hash::hash(&text[start..end], features.hash32))
}

fn skip_keyword(text: &[u8], features: &Features) -> Result<usize, Error> {
    let start = skip_spaces(text, 0);
    Ok(skip_keyword_opt(text, start, features))
}

fn skip_keyword_opt(text: &[u8], start: usize, _features: &Features) -> usize {
    let mut i = start;
    while i < text.len() && (text[i].is_ascii_alphanumeric() || text[i] == b'_') {
        i += 1;
    }
    i
}

/// Finds the end of the current `:`-separated clause: the offset of the
/// next unquoted `:`, the offset of a trailing `'` comment, or `text.len()`.
/// Quoted string contents are skipped over so an embedded colon inside a
/// string literal is never mistaken for a clause separator.
fn find_clause_end(text: &[u8], start: usize) -> usize {
    let mut i = start;
    let mut in_string = false;
    while i < text.len() {
        match text[i] {
            b'"' => in_string = !in_string,
            b':' | b'\'' if !in_string => return i,
            _ => {}
        }
        i += 1;
    }
    i
}

/// Advances past the separator found at `clause_end` (a `:`), or to the end
/// of the line if `clause_end` landed on a comment or the line's end.
fn skip_past_clause(text: &[u8], clause_end: usize) -> usize {
    if clause_end < text.len() && text[clause_end] == b':' {
        clause_end + 1
    } else {
        text.len()
    }
}

fn skip_keyword_literal(text: &[u8], offset: usize, kw: &[u8]) -> Option<usize> {
    let pos = skip_spaces(text, offset);
    if pos + kw.len() <= text.len() && text[pos..pos + kw.len()].eq_ignore_ascii_case(kw) {
        Some(skip_spaces(text, pos + kw.len()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal `ProgramLineProvider` for exercising `Interpreter::run()`
    /// against small in-memory programs, without depending on `b1fmt` (which
    /// depends on this crate). Same FOR/NEXT, WHILE/WEND and DATA bookkeeping
    /// shape as `b1fmt::Program`, just built from a literal line list.
    struct MockProgram {
        lines: Vec<(u32, Vec<u8>)>,
        current: usize,
        for_next: HashMap<u32, usize>,
        for_open: Vec<u32>,
        while_wend: HashMap<u32, usize>,
        while_open: Vec<u32>,
        data_lines: Vec<u32>,
        data_pos: Option<(usize, usize)>,
    }

    impl MockProgram {
        fn new(lines: &[(u32, &str)]) -> Self {
            MockProgram {
                lines: lines.iter().map(|&(n, t)| (n, t.as_bytes().to_vec())).collect(),
                current: 0,
                for_next: HashMap::new(),
                for_open: Vec::new(),
                while_wend: HashMap::new(),
                while_open: Vec::new(),
                data_lines: Vec::new(),
                data_pos: None,
            }
        }

        fn index_of(&self, line_num: u32) -> Option<usize> {
            self.lines.binary_search_by_key(&line_num, |&(n, _)| n).ok()
        }

        fn line_at(&self, idx: usize) -> (u32, Vec<u8>) {
            let (n, t) = &self.lines[idx];
            (*n, t.clone())
        }

        fn data_field_offsets(&self, text: &[u8]) -> Vec<usize> {
            let mut start = skip_spaces(text, 0) + 4; // "DATA"
            if start > text.len() {
                start = text.len();
            }
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

    impl ProgramLineProvider for MockProgram {
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

    /// Captures PRINT/INPUT traffic in memory instead of talking to stdio.
    #[derive(Default)]
    struct MockIo {
        out: Vec<u8>,
        input: std::collections::VecDeque<u8>,
    }

    impl IoPort for MockIo {
        fn put_char(&mut self, c: u8) -> Result<(), Error> {
            self.out.push(c);
            Ok(())
        }

        fn put_newline(&mut self) -> Result<(), Error> {
            self.out.push(b'\n');
            Ok(())
        }

        fn put_margin_newline(&mut self) -> Result<(), Error> {
            self.put_newline()
        }

        fn get_char(&mut self) -> Result<Option<u8>, Error> {
            Ok(self.input.pop_front())
        }
    }

    struct MockRandom;

    impl RandomSource for MockRandom {
        fn randomize(&mut self, _seed: Option<i32>) {}

        fn next_seed(&mut self, max: i32) -> i32 {
            max / 2
        }
    }

    fn run_program(lines: &[(u32, &str)]) -> (Result<Signal, Error>, String) {
        let mut program = MockProgram::new(lines);
        let mut io = MockIo::default();
        let mut rng = MockRandom;
        let result = {
            let mut interp = Interpreter::new(Features::default(), &mut program, &mut io, &mut rng);
            interp.run()
        };
        (result, String::from_utf8_lossy(&io.out).into_owned())
    }

    #[test]
    fn print_and_end() {
        let (result, out) = run_program(&[(10, "PRINT 2 + 3"), (20, "END")]);
        assert_eq!(result.unwrap(), Signal::End);
        assert!(out.contains('5'));
    }

    #[test]
    fn if_elseif_else_picks_one_arm() {
        let (result, out) = run_program(&[
            (10, "LET X = 2"),
            (20, "IF X = 1 THEN PRINT \"one\" : ELSEIF X = 2 THEN PRINT \"two\" : ELSE PRINT \"other\""),
            (30, "END"),
        ]);
        assert_eq!(result.unwrap(), Signal::End);
        assert!(out.contains("two"));
        assert!(!out.contains("one"));
        assert!(!out.contains("other"));
    }

    #[test]
    fn for_next_accumulates() {
        let (result, out) = run_program(&[
            (10, "LET S = 0"),
            (20, "FOR I = 1 TO 5"),
            (30, "LET S = S + I"),
            (40, "NEXT I"),
            (50, "PRINT S"),
            (60, "END"),
        ]);
        assert_eq!(result.unwrap(), Signal::End);
        assert!(out.contains("15"));
    }

    #[test]
    fn goto_skips_forward() {
        let (result, out) = run_program(&[
            (10, "GOTO 30"),
            (20, "PRINT \"skipped\""),
            (30, "PRINT \"reached\""),
            (40, "END"),
        ]);
        assert_eq!(result.unwrap(), Signal::End);
        assert!(out.contains("reached"));
        assert!(!out.contains("skipped"));
    }

    #[test]
    fn array_let_then_read_round_trips() {
        let (result, out) = run_program(&[
            (10, "DIM A(3)"),
            (20, "LET A(2) = 42"),
            (30, "PRINT A(2)"),
            (40, "END"),
        ]);
        assert_eq!(result.unwrap(), Signal::End);
        assert!(out.contains("42"));
    }

    #[test]
    fn string_array_let_then_print_round_trips() {
        let (result, out) = run_program(&[
            (10, "DIM S$(1)"),
            (20, "LET S$(0) = \"hello\""),
            (30, "PRINT S$(0)"),
            (40, "END"),
        ]);
        assert_eq!(result.unwrap(), Signal::End);
        assert!(out.contains("hello"));
    }

    #[test]
    fn read_data_assigns_in_order() {
        let (result, out) = run_program(&[
            (10, "DATA 7, 8"),
            (20, "READ X"),
            (30, "READ Y"),
            (40, "PRINT X + Y"),
            (50, "END"),
        ]);
        assert_eq!(result.unwrap(), Signal::End);
        assert!(out.contains("15"));
    }

    #[test]
    fn gosub_return_comes_back() {
        let (result, out) = run_program(&[
            (10, "GOSUB 100"),
            (20, "PRINT \"after\""),
            (30, "END"),
            (100, "PRINT \"sub\""),
            (110, "RETURN"),
        ]);
        assert_eq!(result.unwrap(), Signal::End);
        assert!(out.contains("sub"));
        assert!(out.contains("after"));
    }

    #[test]
    fn unknown_identifier_under_option_explicit_errors() {
        let (result, _) = run_program(&[
            (10, "OPTION EXPLICIT"),
            (20, "LET X = 1"),
            (30, "END"),
        ]);
        assert_eq!(result.unwrap_err().kind, ErrorKind::UnknownIdentifier);
    }
}
