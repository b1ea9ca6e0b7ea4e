//! Diagnostics and typed failures. Every message the analysis produces
//! carries a stable numeric id so callers can match on it; the bag holds
//! whatever passes the configured minimum level and warnings never stop
//! the run.

use colored::*;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Trace,
    Warning,
    Error,
}

/// The stable diagnostic taxonomy. The discriminant is the public id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    /// Solver backtracked.
    SolverBacktracked = 100,
    /// Constraint added.
    ConstraintAdded = 101,
    /// Byte chosen Reloc.
    ByteChosenReloc = 102,
    /// Byte chosen NoReloc.
    ByteChosenNoReloc = 103,
    /// A byte contributes multiple times to one sum; not relocated.
    DuplicateContribution = 400,
    /// Write out of bounds of safe RAM.
    WriteOutOfBounds = 401,
    /// No solution found.
    NoSolution = 501,
    /// Relocation inconsistency.
    Inconsistency = 502,
}

impl DiagnosticCode {
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn level(self) -> DiagnosticLevel {
        match self {
            DiagnosticCode::SolverBacktracked
            | DiagnosticCode::ConstraintAdded
            | DiagnosticCode::ByteChosenReloc
            | DiagnosticCode::ByteChosenNoReloc => DiagnosticLevel::Trace,
            DiagnosticCode::DuplicateContribution | DiagnosticCode::WriteOutOfBounds => {
                DiagnosticLevel::Warning
            }
            DiagnosticCode::NoSolution | DiagnosticCode::Inconsistency => DiagnosticLevel::Error,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CR{}", self.id())
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
}

impl Diagnostic {
    /// Render for a terminal, colored by severity.
    pub fn display(&self) -> String {
        let code = self.code.to_string();
        let code = match self.code.level() {
            DiagnosticLevel::Trace => code.as_str().dimmed(),
            DiagnosticLevel::Warning => code.as_str().yellow().bold(),
            DiagnosticLevel::Error => code.as_str().red().bold(),
        };
        format!("{} {}", code, self.message)
    }
}

/// Collects diagnostics at or above a minimum level. Traces additionally
/// mirror to the `log` facade so a host logger sees them live.
pub struct DiagnosticBag {
    minimum_level: DiagnosticLevel,
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new(minimum_level: DiagnosticLevel) -> DiagnosticBag {
        DiagnosticBag {
            minimum_level,
            diagnostics: Vec::new(),
        }
    }

    pub fn record(&mut self, code: DiagnosticCode, message: String) {
        match code.level() {
            DiagnosticLevel::Trace => log::trace!("{} {}", code, message),
            DiagnosticLevel::Warning => log::warn!("{} {}", code, message),
            DiagnosticLevel::Error => log::error!("{} {}", code, message),
        }
        if code.level() >= self.minimum_level {
            self.diagnostics.push(Diagnostic { code, message });
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.code.level() == DiagnosticLevel::Warning)
    }

    pub fn contains(&self, code: DiagnosticCode) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }

    pub fn clear(&mut self) {
        self.diagnostics.clear();
    }
}

/// A fatal CPU condition; execution of the caller's request is aborted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CpuError {
    #[error("unsupported opcode {opcode:#04x} at {pc:#06x}")]
    UnsupportedOpcode { opcode: u8, pc: u16 },
}

/// A fatal relocation failure, carrying its diagnostic id.
#[derive(Debug, Error)]
pub enum RelocError {
    #[error("{0}")]
    Cpu(#[from] CpuError),
    #[error("the cpu jammed at {pc:#06x}")]
    Jammed { pc: u16 },
    #[error("relocation target {target:#06x} must keep the origin's low byte {origin_low:#04x}")]
    TargetLowByteMismatch { target: u16, origin_low: u8 },
    #[error("relocation target {target:#06x} is below 0x0200")]
    TargetTooLow { target: u16 },
    #[error("program of {len} bytes does not fit below 0x10000 at {target:#06x}")]
    TargetOutOfRange { target: u16, len: usize },
    #[error("zero page relocation is enabled but the destination range is empty")]
    EmptyZeroPageRange,
    #[error("CR501 no solution found for the relocation constraints")]
    NoSolution,
    #[error("CR502 relocation inconsistency: {0}")]
    Inconsistency(String),
    #[error("cannot fit the zero page classes into the requested range")]
    ZeroPageOverflow,
}

impl RelocError {
    /// The stable diagnostic id for errors that carry one.
    pub fn code(&self) -> Option<DiagnosticCode> {
        match self {
            RelocError::NoSolution => Some(DiagnosticCode::NoSolution),
            RelocError::Inconsistency(_) | RelocError::ZeroPageOverflow => {
                Some(DiagnosticCode::Inconsistency)
            }
            _ => None,
        }
    }
}
