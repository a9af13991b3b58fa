//! Closed error-kind taxonomy for the interpreter, one-for-one with the
//! `B1_RES_*` return codes of the original C core.

use thiserror::Error;

/// Every way a statement, expression or prepass step can fail, plus the two
/// non-error "stop" signals (`End`, `Stop`) that unwind the main loop without
/// being errors in the Rust sense.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("invalid token")]
    InvalidToken,
    #[error("program line too long")]
    LineTooLong,
    #[error("invalid line number")]
    InvalidLineNumber,
    #[error("invalid statement")]
    InvalidStatement,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("expression too long")]
    ExpressionTooLong,
    #[error("missing comma or bracket")]
    MissingBracket,
    #[error("unbalanced brackets")]
    UnbalancedBrackets,
    #[error("wrong argument count")]
    WrongArgCount,
    #[error("expression evaluation stack overflow")]
    EvalStackOverflow,
    #[error("syntax error")]
    Syntax,
    #[error("wrong argument type")]
    WrongArgType,
    #[error("not enough memory")]
    OutOfMemory,
    #[error("invalid memory block descriptor")]
    InvalidMemoryBlock,
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("string too long")]
    StringTooLong,
    #[error("too many open brackets")]
    TooManyBrackets,
    #[error("unknown identifier")]
    UnknownIdentifier,
    #[error("wrong subscript count")]
    WrongSubscriptCount,
    #[error("type mismatch")]
    TypeMismatch,
    #[error("subscript out of range")]
    SubscriptRange,
    #[error("identifier already in use")]
    IdentifierInUse,
    #[error("integer divide by zero")]
    DivideByZero,
    #[error("nested IF statement not allowed")]
    NestedIf,
    #[error("ELSE without IF")]
    ElseWithoutIf,
    #[error("line number not found")]
    LineNumberNotFound,
    #[error("statement stack overflow")]
    StatementStackOverflow,
    #[error("statement stack underflow")]
    StatementStackUnderflow,
    #[error("reserved word used in this context")]
    ReservedWord,
    #[error("not a variable")]
    NotVariable,
    #[error("environment fatal error")]
    EnvFatal,
    #[error("unexpected RETURN statement")]
    NoGosub,
    #[error("unexpected end of program")]
    ProgramUnended,
    #[error("end of DATA block reached")]
    DataEnd,
    #[error("WEND without WHILE")]
    WendWithoutWhile,
    #[error("NEXT without FOR")]
    NextWithoutFor,
    #[error("FOR without NEXT")]
    ForWithoutNext,
    #[error("subscripted variable can't be a FOR control variable")]
    ForSubscriptedVar,
    #[error("invalid number")]
    InvalidNumber,
    #[error("numeric overflow")]
    NumericOverflow,
    #[error("too many DEF statements")]
    TooManyDefs,
    #[error("user function call stack overflow")]
    UserFnStackOverflow,
    #[error("end of file")]
    Eof,
    #[error("reserved keyword can't be used as an identifier")]
    ReservedKeyword,
    #[error("WHILE without WEND")]
    WhileWithoutWend,
    #[error("BREAK or CONTINUE not within a loop")]
    NotInLoop,
    #[error("too many breakpoints")]
    TooManyBreakpoints,
}

impl ErrorKind {
    /// The original C core's `B1_RES_*` numeric code, preserved for anyone
    /// porting programs or test fixtures that assert on it.
    pub fn code(self) -> u8 {
        use ErrorKind::*;
        match self {
            InvalidToken => 100,
            LineTooLong => 101,
            InvalidLineNumber => 102,
            InvalidStatement => 103,
            InvalidArgument => 104,
            ExpressionTooLong => 105,
            MissingBracket => 106,
            UnbalancedBrackets => 107,
            WrongArgCount => 108,
            EvalStackOverflow => 109,
            Syntax => 110,
            WrongArgType => 111,
            OutOfMemory => 112,
            InvalidMemoryBlock => 113,
            BufferTooSmall => 114,
            StringTooLong => 115,
            TooManyBrackets => 116,
            UnknownIdentifier => 117,
            WrongSubscriptCount => 118,
            TypeMismatch => 119,
            SubscriptRange => 120,
            IdentifierInUse => 121,
            DivideByZero => 122,
            NestedIf => 123,
            ElseWithoutIf => 124,
            LineNumberNotFound => 125,
            StatementStackOverflow => 126,
            StatementStackUnderflow => 127,
            ReservedWord => 128,
            NotVariable => 129,
            EnvFatal => 130,
            NoGosub => 131,
            ProgramUnended => 132,
            DataEnd => 133,
            WendWithoutWhile => 134,
            NextWithoutFor => 135,
            ForWithoutNext => 136,
            ForSubscriptedVar => 137,
            InvalidNumber => 138,
            NumericOverflow => 139,
            TooManyDefs => 140,
            UserFnStackOverflow => 141,
            Eof => 142,
            ReservedKeyword => 143,
            WhileWithoutWend => 144,
            NotInLoop => 145,
            TooManyBreakpoints => 146,
        }
    }
}

/// Outcome of one interpreter step: either an `ErrorKind` failure, or one of
/// the two non-error unwind signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Execution reached an `END` statement.
    End,
    /// Execution reached a `STOP` statement; resumable at the next line.
    Stop,
}

/// An `ErrorKind` together with the 1-based program line it happened on, if
/// execution had started. Line is `None` for errors raised during the
/// prepass before any line counter is meaningful.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{kind}{}", .line.map(|l| format!(" (line {l})")).unwrap_or_default())]
pub struct Error {
    pub kind: ErrorKind,
    pub line: Option<u32>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, line: None }
    }

    pub fn at_line(kind: ErrorKind, line: u32) -> Self {
        Error {
            kind,
            line: Some(line),
        }
    }

    pub fn with_line(self, line: u32) -> Self {
        Error {
            kind: self.kind,
            line: Some(line),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

pub type B1Result<T> = Result<T, Error>;

/// Result of running a program to completion: either a success signal or an
/// error. Kept distinct from `B1Result` because `Signal` is not a failure.
pub type RunResult = Result<Signal, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_original_range() {
        assert_eq!(ErrorKind::InvalidToken.code(), 100);
        assert_eq!(ErrorKind::TooManyBreakpoints.code(), 146);
    }

    #[test]
    fn error_carries_optional_line() {
        let e = Error::new(ErrorKind::DivideByZero).with_line(20);
        assert_eq!(e.line, Some(20));
    }
}
