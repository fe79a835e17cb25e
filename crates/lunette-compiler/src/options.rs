//! Language-version gating and compiler switches.

use std::fmt;

/// Which Lua dialect the compiler accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LuaVersion {
    Lua52,
    Lua53,
    #[default]
    Lua54,
}

impl LuaVersion {
    pub fn at_least(self, other: LuaVersion) -> bool {
        self >= other
    }

    /// Parse "5.2", "5.3", "5.4" (also accepted with a "lua" prefix).
    pub fn parse(s: &str) -> Option<LuaVersion> {
        match s.trim().trim_start_matches("lua").trim_start_matches("Lua") {
            "5.2" | "52" => Some(LuaVersion::Lua52),
            "5.3" | "53" => Some(LuaVersion::Lua53),
            "5.4" | "54" => Some(LuaVersion::Lua54),
            _ => None,
        }
    }
}

impl fmt::Display for LuaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaVersion::Lua52 => write!(f, "Lua 5.2"),
            LuaVersion::Lua53 => write!(f, "Lua 5.3"),
            LuaVersion::Lua54 => write!(f, "Lua 5.4"),
        }
    }
}

/// Options for one compilation.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    pub version: LuaVersion,
    /// Chunk name as given by the host, e.g. `=stdin` or `@file.lua`.
    pub chunk_name: String,
    /// Compile as a dynamic expression: a single expression, no `_ENV`
    /// upvalue, free names resolve against the VM's globals directly.
    pub dynamic_expression: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            version: LuaVersion::default(),
            chunk_name: "=?".to_string(),
            dynamic_expression: false,
        }
    }
}

impl CompileOptions {
    pub fn new(chunk_name: impl Into<String>) -> Self {
        CompileOptions {
            chunk_name: chunk_name.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: LuaVersion) -> Self {
        self.version = version;
        self
    }

    /// Human-facing chunk name used in messages.
    pub fn display_chunk_name(&self) -> String {
        display_chunk_name(&self.chunk_name)
    }
}

/// Lua's `luaO_chunkid`: `=name` verbatim, `@file` as the file name,
/// anything else as `[string "first line..."]`.
pub fn display_chunk_name(name: &str) -> String {
    if let Some(rest) = name.strip_prefix('=') {
        rest.to_string()
    } else if let Some(rest) = name.strip_prefix('@') {
        rest.to_string()
    } else {
        let first_line = name.lines().next().unwrap_or("");
        const MAX: usize = 40;
        if first_line.len() < name.len() || first_line.chars().count() > MAX {
            let truncated: String = first_line.chars().take(MAX).collect();
            format!("[string \"{truncated}...\"]")
        } else {
            format!("[string \"{first_line}\"]")
        }
    }
}
