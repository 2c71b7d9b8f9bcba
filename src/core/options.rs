//! Compilation options.
//!
//! `CompileOptions` selects the optimisation level, the code generation target and the
//! debugging side channels of a run. Options use builder-style setters so callers can
//! write `CompileOptions::default().with_opt_level(OptLevel::O1).with_pic(true)`.

use strum::{Display, EnumString};

/// Optimisation level selecting which pass list runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
pub enum OptLevel {
    /// Verification only; values stay in memory.
    #[default]
    #[strum(serialize = "O0")]
    O0,
    /// Memory-to-register promotion.
    #[strum(serialize = "O1")]
    O1,
}

impl OptLevel {
    /// Map a numeric level: 0 is `O0`, anything higher is `O1`.
    pub fn from_level(level: u8) -> Self {
        if level == 0 {
            OptLevel::O0
        } else {
            OptLevel::O1
        }
    }
}

/// Code generation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum CodegenTarget {
    /// x86-64 with the System V calling convention, GAS syntax.
    #[default]
    #[strum(serialize = "x86_64-sysv")]
    X64SysV,
}

/// Options of one compilation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub opt_level: OptLevel,
    pub target: CodegenTarget,
    /// Emit position independent code (`@PLT` calls, `@GOTPCREL` extern addresses).
    pub pic: bool,
    /// Capture an IR dump after every pass.
    pub dump_ir: bool,
    /// Compile the functions of a module on the rayon thread pool.
    pub parallel: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::O0,
            target: CodegenTarget::X64SysV,
            pic: false,
            dump_ir: false,
            parallel: true,
        }
    }
}

impl CompileOptions {
    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    pub fn with_target(mut self, target: CodegenTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_pic(mut self, pic: bool) -> Self {
        self.pic = pic;
        self
    }

    pub fn with_dump_ir(mut self, dump: bool) -> Self {
        self.dump_ir = dump;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}
